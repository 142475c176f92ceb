use thiserror::Error;

/// Inbound data that could not be turned into a typed value.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("message is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("point cloud payload is not a valid point list: {0}")]
    InvalidPointCloud(#[source] serde_json::Error),
    #[error("sensor line is malformed: {0}")]
    InvalidSensorLine(String),
}
