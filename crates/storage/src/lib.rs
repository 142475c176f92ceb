use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    FileKind, NewSensorReading, NewSession, NewSessionFile, SensorReading, SensorReadingId,
    Session, SessionFile, SessionFileId, SessionId,
};

/// Persistence interface consumed by the capture core. The write half is used
/// by the session coordinator; the read half serves history views and tools.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &NewSession) -> Result<SessionId>;
    async fn end_session(&self, session_id: SessionId, end_time: DateTime<Utc>) -> Result<()>;
    async fn insert_session_file(&self, file: &NewSessionFile) -> Result<SessionFileId>;
    async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> Result<SensorReadingId>;

    async fn get_session_by_id(&self, session_id: SessionId) -> Result<Option<Session>>;
    async fn get_all_sessions(&self) -> Result<Vec<Session>>;
    async fn get_files_for_session(&self, session_id: SessionId) -> Result<Vec<SessionFile>>;
    async fn get_sensor_readings_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<SensorReading>>;
    async fn get_all_sensor_readings(&self) -> Result<Vec<SensorReading>>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Storage {
    async fn create_session(&self, session: &NewSession) -> Result<SessionId> {
        let rec = sqlx::query(
            "INSERT INTO sessions (session_name, start_time, end_time) VALUES (?, ?, NULL) RETURNING id",
        )
        .bind(&session.name)
        .bind(session.start_time)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to create session '{}'", session.name))?;
        Ok(SessionId(rec.get::<i64, _>(0)))
    }

    async fn end_session(&self, session_id: SessionId, end_time: DateTime<Utc>) -> Result<()> {
        let updated =
            sqlx::query("UPDATE sessions SET end_time = ? WHERE id = ? AND end_time IS NULL")
                .bind(end_time)
                .bind(session_id.0)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to end session {session_id}"))?
                .rows_affected();
        if updated == 0 {
            return Err(anyhow!(
                "session {session_id} does not exist or has already ended"
            ));
        }
        Ok(())
    }

    async fn insert_session_file(&self, file: &NewSessionFile) -> Result<SessionFileId> {
        let rec = sqlx::query(
            "INSERT INTO session_files (session_id, file_path, file_type, created_at)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(file.session_id.0)
        .bind(&file.file_path)
        .bind(file.file_type.as_str())
        .bind(file.created_at)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert file record '{}'", file.file_path))?;
        Ok(SessionFileId(rec.get::<i64, _>(0)))
    }

    async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> Result<SensorReadingId> {
        let rec = sqlx::query(
            "INSERT INTO sensor_readings (session_id, ekg, pressure, timestamp)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(reading.session_id.map(|id| id.0))
        .bind(reading.ekg)
        .bind(reading.pressure)
        .bind(reading.timestamp)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert sensor reading")?;
        Ok(SensorReadingId(rec.get::<i64, _>(0)))
    }

    async fn get_session_by_id(&self, session_id: SessionId) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, session_name, start_time, end_time FROM sessions WHERE id = ?",
        )
        .bind(session_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| session_from_row(&r)).transpose()
    }

    async fn get_all_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT id, session_name, start_time, end_time FROM sessions
             ORDER BY start_time DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn get_files_for_session(&self, session_id: SessionId) -> Result<Vec<SessionFile>> {
        let rows = sqlx::query(
            "SELECT id, session_id, file_path, file_type, created_at FROM session_files
             WHERE session_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_file_from_row).collect()
    }

    async fn get_sensor_readings_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<SensorReading>> {
        let rows = sqlx::query(
            "SELECT id, session_id, ekg, pressure, timestamp FROM sensor_readings
             WHERE session_id = ?
             ORDER BY timestamp ASC, id ASC",
        )
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sensor_reading_from_row).collect()
    }

    async fn get_all_sensor_readings(&self) -> Result<Vec<SensorReading>> {
        let rows = sqlx::query(
            "SELECT id, session_id, ekg, pressure, timestamp FROM sensor_readings
             ORDER BY timestamp ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sensor_reading_from_row).collect()
    }
}

fn session_from_row(r: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: SessionId(r.try_get::<i64, _>(0)?),
        name: r.try_get::<String, _>(1)?,
        start_time: r.try_get::<DateTime<Utc>, _>(2)?,
        end_time: r.try_get::<Option<DateTime<Utc>>, _>(3)?,
    })
}

fn session_file_from_row(r: &SqliteRow) -> Result<SessionFile> {
    let raw_type = r.try_get::<String, _>(3)?;
    let file_type = FileKind::from_db(&raw_type)
        .ok_or_else(|| anyhow!("unknown file type '{raw_type}' in session_files"))?;
    Ok(SessionFile {
        id: SessionFileId(r.try_get::<i64, _>(0)?),
        session_id: SessionId(r.try_get::<i64, _>(1)?),
        file_path: r.try_get::<String, _>(2)?,
        file_type,
        created_at: r.try_get::<DateTime<Utc>, _>(4)?,
    })
}

fn sensor_reading_from_row(r: &SqliteRow) -> Result<SensorReading> {
    Ok(SensorReading {
        id: SensorReadingId(r.try_get::<i64, _>(0)?),
        session_id: r.try_get::<Option<i64>, _>(1)?.map(SessionId),
        ekg: r.try_get::<f64, _>(2)?,
        pressure: r.try_get::<f64, _>(3)?,
        timestamp: r.try_get::<DateTime<Utc>, _>(4)?,
    })
}

pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

pub fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
