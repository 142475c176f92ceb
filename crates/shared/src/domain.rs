use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(SessionFileId);
id_newtype!(SensorReadingId);

/// Category of a persisted frame reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Bmp,
    Jpg,
    #[serde(rename = "pointcloud")]
    PointCloud,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Bmp => "bmp",
            FileKind::Jpg => "jpg",
            FileKind::PointCloud => "pointcloud",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "bmp" => Some(FileKind::Bmp),
            "jpg" => Some(FileKind::Jpg),
            "pointcloud" => Some(FileKind::PointCloud),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub name: String,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub id: SessionFileId,
    pub session_id: SessionId,
    pub file_path: String,
    pub file_type: FileKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSessionFile {
    pub session_id: SessionId,
    pub file_path: String,
    pub file_type: FileKind,
    pub created_at: DateTime<Utc>,
}

/// A sensor reading as recorded. `session_id` is `None` when the reading
/// arrived while no session was active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: SensorReadingId,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub ekg: f64,
    pub pressure: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSensorReading {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub ekg: f64,
    pub pressure: f64,
    pub timestamp: DateTime<Utc>,
}
