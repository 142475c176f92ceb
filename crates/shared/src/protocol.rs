//! Wire formats spoken by the capture server's frame socket and the sensor
//! line protocol, plus the typed frames they parse into.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{domain::FileKind, error::ParseError};

pub const FILE_TYPE_BMP: &str = "bmp";
pub const FILE_TYPE_JPG: &str = "jpg";
pub const FILE_TYPE_PLY: &str = "ply";
pub const FILE_TYPE_POINTCLOUD_JSON: &str = "pointcloud-json";

/// One JSON object as received on the frame socket. Every field is optional on
/// the wire; [`FrameEnvelope::into_frame`] decides what is actually required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl FrameEnvelope {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        serde_json::from_str(raw).map_err(ParseError::InvalidJson)
    }

    /// Converts the envelope into a typed frame. Empty strings count as
    /// absent, so `{"fileType": "", ...}` is rejected like a missing field.
    pub fn into_frame(self) -> Result<Frame, ParseError> {
        let file_type = non_empty(self.file_type).ok_or(ParseError::MissingField("fileType"))?;
        let payload = non_empty(self.payload).ok_or(ParseError::MissingField("payload"))?;
        let filename = non_empty(self.filename);
        let session_folder = self.session.unwrap_or_default();

        let frame = match file_type.as_str() {
            FILE_TYPE_BMP => Frame::Image(ImageFrame {
                kind: ImageKind::Bmp,
                filename: filename.unwrap_or_else(|| "unknown.bmp".to_string()),
                base64: payload,
                session_folder,
            }),
            FILE_TYPE_JPG => Frame::Image(ImageFrame {
                kind: ImageKind::Jpg,
                filename: filename.unwrap_or_else(|| "unknown.jpg".to_string()),
                base64: payload,
                session_folder,
            }),
            FILE_TYPE_POINTCLOUD_JSON => {
                let points: Vec<PointRecord> =
                    serde_json::from_str(&payload).map_err(ParseError::InvalidPointCloud)?;
                Frame::PointCloud(PointCloudFrame {
                    filename: filename.unwrap_or_else(|| "cloud.json".to_string()),
                    session_folder,
                    data: PointCloudData::Points(points),
                })
            }
            FILE_TYPE_PLY => Frame::PointCloud(PointCloudFrame {
                filename: filename.unwrap_or_else(|| "cloud.ply".to_string()),
                session_folder,
                data: PointCloudData::Ply(payload),
            }),
            _ => Frame::Unknown {
                file_type,
                raw: payload,
            },
        };
        Ok(frame)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Bmp,
    Jpg,
}

impl ImageKind {
    pub fn file_kind(&self) -> FileKind {
        match self {
            ImageKind::Bmp => FileKind::Bmp,
            ImageKind::Jpg => FileKind::Jpg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub kind: ImageKind,
    pub filename: String,
    pub base64: String,
    pub session_folder: String,
}

impl ImageFrame {
    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.base64.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ny: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nz: Option<f64>,
}

/// Point cloud contents. `Ply` carries the undecoded legacy payload as sent;
/// consumers must not assume it is structured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "data", rename_all = "snake_case")]
pub enum PointCloudData {
    Points(Vec<PointRecord>),
    Ply(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloudFrame {
    pub filename: String,
    pub session_folder: String,
    pub data: PointCloudData,
}

impl PointCloudFrame {
    pub fn point_count(&self) -> Option<usize> {
        match &self.data {
            PointCloudData::Points(points) => Some(points.len()),
            PointCloudData::Ply(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Frame {
    Image(ImageFrame),
    PointCloud(PointCloudFrame),
    Unknown { file_type: String, raw: String },
}

impl Frame {
    /// Parses one raw socket message.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        FrameEnvelope::parse(raw)?.into_frame()
    }

    pub fn file_kind(&self) -> Option<FileKind> {
        match self {
            Frame::Image(image) => Some(image.kind.file_kind()),
            Frame::PointCloud(_) => Some(FileKind::PointCloud),
            Frame::Unknown { .. } => None,
        }
    }

    /// `<session folder>/<filename>` for frames that map to a session file.
    pub fn file_path(&self) -> Option<String> {
        let (folder, filename) = match self {
            Frame::Image(image) => (&image.session_folder, &image.filename),
            Frame::PointCloud(cloud) => (&cloud.session_folder, &cloud.filename),
            Frame::Unknown { .. } => return None,
        };
        Some(format!("{folder}/{filename}"))
    }
}

/// One decoded line of the sensor protocol: `{"EKG": <n>, "Pressure": <n>}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorLine {
    pub ekg: f64,
    pub pressure: f64,
}

impl SensorLine {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|err| ParseError::InvalidSensorLine(format!("not JSON: {err}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| ParseError::InvalidSensorLine("not a JSON object".to_string()))?;
        let ekg = numeric_field(object.get("EKG"), "EKG")?;
        let pressure = numeric_field(object.get("Pressure"), "Pressure")?;
        Ok(Self { ekg, pressure })
    }
}

fn numeric_field(value: Option<&Value>, name: &str) -> Result<f64, ParseError> {
    let value =
        value.ok_or_else(|| ParseError::InvalidSensorLine(format!("missing `{name}`")))?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number
        .filter(|n| n.is_finite())
        .ok_or_else(|| ParseError::InvalidSensorLine(format!("`{name}` is not numeric")))
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
