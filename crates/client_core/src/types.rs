use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::domain::SessionId;

use crate::error::FailureReport;

/// Which capture session, if any, is currently open.
///
/// `started` is true exactly when `session_id` is present; the only way to
/// build a non-idle value is [`ActiveSessionState::active`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SessionStateFields")]
pub struct ActiveSessionState {
    session_id: Option<SessionId>,
    name: Option<String>,
    started: bool,
}

impl ActiveSessionState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn active(session_id: SessionId, name: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id),
            name: Some(name.into()),
            started: true,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

#[derive(Deserialize)]
struct SessionStateFields {
    session_id: Option<SessionId>,
    name: Option<String>,
    started: bool,
}

impl TryFrom<SessionStateFields> for ActiveSessionState {
    type Error = String;

    fn try_from(fields: SessionStateFields) -> Result<Self, Self::Error> {
        match (fields.session_id, fields.name, fields.started) {
            (Some(session_id), Some(name), true) => Ok(Self::active(session_id, name)),
            (None, None, false) => Ok(Self::idle()),
            (session_id, name, started) => Err(format!(
                "inconsistent session state: session_id={session_id:?} name={name:?} started={started}"
            )),
        }
    }
}

/// A sensor reading as delivered by a [`crate::sensor::SensorSource`], stamped
/// with its arrival time. It carries no session; the coordinator assigns one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub ekg: f64,
    pub pressure: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    SessionStateChanged(ActiveSessionState),
    SensorReading {
        session_id: Option<SessionId>,
        sample: SensorSample,
    },
    LinkStateChanged {
        connected: bool,
    },
    Failure(FailureReport),
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
