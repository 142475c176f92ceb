use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use shared::domain::{SensorReading, SessionId};
use storage::{SessionStore, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/capture.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sessions, newest first.
    Sessions,
    Session {
        session_id: i64,
    },
    /// Files recorded during a session, oldest first.
    Files {
        session_id: i64,
    },
    /// Sensor readings, for one session or all of them.
    Readings {
        #[arg(long)]
        session: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Sessions => {
            for session in storage.get_all_sessions().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    session.id,
                    session.name,
                    session.start_time.to_rfc3339(),
                    session
                        .end_time
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "open".to_string())
                );
            }
        }
        Command::Session { session_id } => {
            let session = storage
                .get_session_by_id(SessionId(session_id))
                .await?
                .ok_or_else(|| anyhow!("session {session_id} not found"))?;
            let files = storage.get_files_for_session(session.id).await?;
            let readings = storage.get_sensor_readings_for_session(session.id).await?;
            println!("session_id={} name={}", session.id, session.name);
            println!("started={}", session.start_time.to_rfc3339());
            match session.end_time {
                Some(end_time) => println!("ended={}", end_time.to_rfc3339()),
                None => println!("ended=never"),
            }
            println!("files={} readings={}", files.len(), readings.len());
        }
        Command::Files { session_id } => {
            for file in storage.get_files_for_session(SessionId(session_id)).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    file.id,
                    file.file_type,
                    file.file_path,
                    file.created_at.to_rfc3339()
                );
            }
        }
        Command::Readings { session } => {
            let readings = match session {
                Some(session_id) => {
                    storage
                        .get_sensor_readings_for_session(SessionId(session_id))
                        .await?
                }
                None => storage.get_all_sensor_readings().await?,
            };
            for reading in readings {
                print_reading(&reading);
            }
        }
    }

    Ok(())
}

fn print_reading(reading: &SensorReading) {
    let session = reading
        .session_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}\t{}\t{}\t{}\t{}",
        reading.timestamp.to_rfc3339(),
        session,
        reading.ekg,
        reading.pressure,
        reading.id
    );
}
