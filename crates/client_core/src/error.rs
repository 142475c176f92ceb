use serde::{Deserialize, Serialize};
use shared::error::ParseError;
use thiserror::Error;

use crate::command_client::CommandOp;

#[derive(Debug, Error)]
#[error("remote command `{operation}` failed: {cause}")]
pub struct RemoteCommandError {
    pub operation: CommandOp,
    #[source]
    pub cause: CommandFailure,
}

impl RemoteCommandError {
    pub fn new(operation: CommandOp, cause: impl Into<CommandFailure>) -> Self {
        Self {
            operation,
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The capture server could not be reached at all.
    #[error("{0}")]
    Unavailable(String),
}

/// Every failure the capture core can observe. None of them is fatal; callers
/// log, report, and keep going.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("frame transport: {0}")]
    Transport(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    RemoteCommand(#[from] RemoteCommandError),
    #[error("persistence ({operation}): {cause:#}")]
    Persistence {
        operation: &'static str,
        cause: anyhow::Error,
    },
    #[error("session {0} is already active")]
    SessionAlreadyActive(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Parse,
    RemoteCommand,
    Persistence,
    SessionConflict,
}

impl CoreError {
    pub fn persistence(operation: &'static str, cause: anyhow::Error) -> Self {
        Self::Persistence { operation, cause }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Transport(_) => ErrorKind::Transport,
            CoreError::Parse(_) => ErrorKind::Parse,
            CoreError::RemoteCommand(_) => ErrorKind::RemoteCommand,
            CoreError::Persistence { .. } => ErrorKind::Persistence,
            CoreError::SessionAlreadyActive(_) => ErrorKind::SessionConflict,
        }
    }

    pub fn operation(&self) -> Option<String> {
        match self {
            CoreError::RemoteCommand(err) => Some(err.operation.to_string()),
            CoreError::Persistence { operation, .. } => Some((*operation).to_string()),
            _ => None,
        }
    }
}

/// Cloneable summary of a [`CoreError`] published on the coordinator's event
/// channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub message: String,
}

impl From<&CoreError> for FailureReport {
    fn from(err: &CoreError) -> Self {
        Self {
            kind: err.kind(),
            operation: err.operation(),
            message: err.to_string(),
        }
    }
}
