use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CommandFailure, RemoteCommandError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOp {
    StartStream,
    StopStream,
    StartSession,
    StopSession,
    ReconnectCamera,
    SetHardwareTrigger,
    SetLaser,
    GetStatus,
}

impl CommandOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandOp::StartStream => "start_stream",
            CommandOp::StopStream => "stop_stream",
            CommandOp::StartSession => "start_session",
            CommandOp::StopSession => "stop_session",
            CommandOp::ReconnectCamera => "reconnect_camera",
            CommandOp::SetHardwareTrigger => "set_hardware_trigger",
            CommandOp::SetLaser => "set_laser",
            CommandOp::GetStatus => "get_status",
        }
    }
}

impl std::fmt::Display for CommandOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call against the capture server's control API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    StartStream,
    StopStream,
    StartSession { name: String },
    StopSession,
    ReconnectCamera,
    SetHardwareTrigger { enable: bool },
    SetLaser { on: bool },
    GetStatus,
}

impl RemoteCommand {
    pub fn op(&self) -> CommandOp {
        match self {
            RemoteCommand::StartStream => CommandOp::StartStream,
            RemoteCommand::StopStream => CommandOp::StopStream,
            RemoteCommand::StartSession { .. } => CommandOp::StartSession,
            RemoteCommand::StopSession => CommandOp::StopSession,
            RemoteCommand::ReconnectCamera => CommandOp::ReconnectCamera,
            RemoteCommand::SetHardwareTrigger { .. } => CommandOp::SetHardwareTrigger,
            RemoteCommand::SetLaser { .. } => CommandOp::SetLaser,
            RemoteCommand::GetStatus => CommandOp::GetStatus,
        }
    }

    fn method(&self) -> Method {
        match self {
            RemoteCommand::GetStatus => Method::GET,
            _ => Method::POST,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            RemoteCommand::StartStream => "/start",
            RemoteCommand::StopStream => "/stop",
            RemoteCommand::StartSession { .. } => "/session/start",
            RemoteCommand::StopSession => "/session/stop",
            RemoteCommand::ReconnectCamera => "/reconnect",
            RemoteCommand::SetHardwareTrigger { .. } => "/trigger",
            RemoteCommand::SetLaser { .. } => "/laser",
            RemoteCommand::GetStatus => "/status",
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            RemoteCommand::StartSession { name } => vec![("name", name.clone())],
            RemoteCommand::SetHardwareTrigger { enable } => vec![("enable", flag(*enable))],
            RemoteCommand::SetLaser { on } => vec![("on", flag(*on))],
            _ => Vec::new(),
        }
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// Body returned by the capture server. It is passed through uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait CommandPlane: Send + Sync {
    async fn execute(&self, command: RemoteCommand)
        -> Result<CommandResponse, RemoteCommandError>;
}

/// Stateless request/response wrapper around the capture server's HTTP API.
/// Each call is issued exactly once; retry policy belongs to the caller.
#[derive(Clone)]
pub struct CommandClient {
    http: Client,
    base_url: String,
}

impl CommandClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .with_context(|| format!("invalid command base url: {base_url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "command base url must start with http:// or https://: {base_url}"
            ));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn start_stream(&self) -> Result<CommandResponse, RemoteCommandError> {
        self.execute(RemoteCommand::StartStream).await
    }

    pub async fn stop_stream(&self) -> Result<CommandResponse, RemoteCommandError> {
        self.execute(RemoteCommand::StopStream).await
    }

    pub async fn start_session(&self, name: &str) -> Result<CommandResponse, RemoteCommandError> {
        self.execute(RemoteCommand::StartSession {
            name: name.to_string(),
        })
        .await
    }

    pub async fn stop_session(&self) -> Result<CommandResponse, RemoteCommandError> {
        self.execute(RemoteCommand::StopSession).await
    }

    pub async fn reconnect_camera(&self) -> Result<CommandResponse, RemoteCommandError> {
        self.execute(RemoteCommand::ReconnectCamera).await
    }

    pub async fn set_hardware_trigger(
        &self,
        enable: bool,
    ) -> Result<CommandResponse, RemoteCommandError> {
        self.execute(RemoteCommand::SetHardwareTrigger { enable })
            .await
    }

    pub async fn set_laser(&self, on: bool) -> Result<CommandResponse, RemoteCommandError> {
        self.execute(RemoteCommand::SetLaser { on }).await
    }

    pub async fn get_status(&self) -> Result<CommandResponse, RemoteCommandError> {
        self.execute(RemoteCommand::GetStatus).await
    }

    async fn send(&self, command: &RemoteCommand) -> Result<CommandResponse, CommandFailure> {
        let response = self
            .http
            .request(command.method(), format!("{}{}", self.base_url, command.path()))
            .query(&command.query())
            .send()
            .await
            .map_err(|err| self.classify(err))?
            .error_for_status()?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(CommandResponse { status, body })
    }

    fn classify(&self, err: reqwest::Error) -> CommandFailure {
        if err.is_connect() {
            CommandFailure::Unavailable(format!(
                "capture server at {} is unreachable: {err}",
                self.base_url
            ))
        } else {
            CommandFailure::Http(err)
        }
    }
}

#[async_trait]
impl CommandPlane for CommandClient {
    async fn execute(
        &self,
        command: RemoteCommand,
    ) -> Result<CommandResponse, RemoteCommandError> {
        self.send(&command)
            .await
            .map_err(|cause| RemoteCommandError::new(command.op(), cause))
    }
}

#[cfg(test)]
#[path = "tests/command_client_tests.rs"]
mod tests;
