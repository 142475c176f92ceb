use std::{fs, io, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "rig.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub frame_socket_url: String,
    pub command_base_url: String,
    pub database_url: String,
    pub reconnect_delay_secs: u64,
    pub command_timeout_secs: u64,
    /// `-` reads sensor lines from stdin; `None` runs without a sensor feed.
    pub sensor_device: Option<String>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frame_socket_url: "ws://localhost:9002".into(),
            command_base_url: "http://localhost:8080".into(),
            database_url: "sqlite://./data/capture.db".into(),
            reconnect_delay_secs: 5,
            command_timeout_secs: 10,
            sensor_device: None,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    frame_socket_url: Option<String>,
    command_base_url: Option<String>,
    database_url: Option<String>,
    reconnect_delay_secs: Option<u64>,
    command_timeout_secs: Option<u64>,
    sensor_device: Option<String>,
    log_filter: Option<String>,
}

/// Defaults, then the config file, then `RIG__*` environment variables.
/// A missing default config file is fine; a missing explicit one is not.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();

    let path = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg = parse_file_settings(&raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
            apply_file_settings(&mut settings, file_cfg)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound && config_path.is_none() => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()));
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn parse_file_settings(raw: &str) -> Result<FileSettings> {
    Ok(toml::from_str(raw)?)
}

fn apply_file_settings(settings: &mut Settings, file_cfg: FileSettings) -> Result<()> {
    if let Some(v) = file_cfg.frame_socket_url {
        settings.frame_socket_url = v;
    }
    if let Some(v) = file_cfg.command_base_url {
        settings.command_base_url = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.reconnect_delay_secs {
        settings.reconnect_delay_secs = nonzero_secs("reconnect_delay_secs", v)?;
    }
    if let Some(v) = file_cfg.command_timeout_secs {
        settings.command_timeout_secs = nonzero_secs("command_timeout_secs", v)?;
    }
    if let Some(v) = file_cfg.sensor_device {
        settings.sensor_device = Some(v);
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
    Ok(())
}

fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = lookup("RIG__FRAME_SOCKET_URL") {
        settings.frame_socket_url = v;
    }
    if let Some(v) = lookup("RIG__COMMAND_BASE_URL") {
        settings.command_base_url = v;
    }

    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("RIG__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = lookup("RIG__RECONNECT_DELAY_SECS") {
        settings.reconnect_delay_secs = parse_secs("RIG__RECONNECT_DELAY_SECS", &v)?;
    }
    if let Some(v) = lookup("RIG__COMMAND_TIMEOUT_SECS") {
        settings.command_timeout_secs = parse_secs("RIG__COMMAND_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = lookup("RIG__SENSOR_DEVICE") {
        settings.sensor_device = Some(v).filter(|device| !device.trim().is_empty());
    }
    if let Some(v) = lookup("RIG__LOG_FILTER") {
        settings.log_filter = v;
    }
    Ok(())
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    let secs = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{key} must be a whole number of seconds, got '{value}'"))?;
    nonzero_secs(key, secs)
}

// A zero reconnect delay spins the transport; a zero timeout fails every command.
fn nonzero_secs(key: &str, secs: u64) -> Result<u64> {
    if secs == 0 {
        return Err(anyhow!("{key} must be at least 1 second"));
    }
    Ok(secs)
}

pub fn prepare_database_url(raw_database_url: &str) -> Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    storage::ensure_sqlite_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }
    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        if is_windows_drive_path(path) {
            return format!("sqlite:{}", path.replace('\\', "/"));
        }
        return raw_database_url.to_string();
    }
    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite:{}", path.replace('\\', "/"));
    }

    let path = raw_database_url.replace('\\', "/");
    if is_windows_drive_path(&path) {
        return format!("sqlite:{path}");
    }
    format!("sqlite://{path}")
}

fn is_windows_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'/' | b'\\')
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
