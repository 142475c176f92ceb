use std::{path::PathBuf, pin::Pin, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    ActiveSessionState, CommandClient, CommandPlane, CoordinatorEvent, FrameTransport,
    RemoteCommand, SensorSample, SensorSource, SessionCoordinator, TransportConfig,
};
use storage::Storage;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tokio_stream::Stream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod control;

use config::{load_settings, prepare_database_url, Settings};
use control::{default_session_name, ConsoleCommand, HELP};

type SensorStream = Pin<Box<dyn Stream<Item = SensorSample> + Send>>;

#[derive(Parser, Debug)]
#[command(name = "rig", about = "Capture rig session coordinator")]
struct Cli {
    /// Settings file; defaults to ./rig.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture daemon with an operator console on stdin.
    Capture {
        /// Sensor line source: a device path, or `-` for stdin.
        #[arg(long)]
        sensor_device: Option<String>,
    },
    /// Print the capture server's status.
    Status,
    /// Ask the capture server to reconnect its camera.
    Reconnect,
    Trigger {
        #[arg(value_enum)]
        state: Switch,
    },
    Laser {
        #[arg(value_enum)]
        state: Switch,
    },
    Stream {
        #[arg(value_enum)]
        action: StreamAction,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StreamAction {
    Start,
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .with_context(|| format!("invalid log filter '{}'", settings.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let command = match cli.command {
        Command::Capture { sensor_device } => {
            if sensor_device.is_some() {
                settings.sensor_device = sensor_device;
            }
            return run_capture(settings).await;
        }
        Command::Status => RemoteCommand::GetStatus,
        Command::Reconnect => RemoteCommand::ReconnectCamera,
        Command::Trigger { state } => RemoteCommand::SetHardwareTrigger {
            enable: matches!(state, Switch::On),
        },
        Command::Laser { state } => RemoteCommand::SetLaser {
            on: matches!(state, Switch::On),
        },
        Command::Stream { action } => match action {
            StreamAction::Start => RemoteCommand::StartStream,
            StreamAction::Stop => RemoteCommand::StopStream,
        },
    };

    let client = CommandClient::new(&settings.command_base_url, settings.command_timeout())?;
    let response = client.execute(command).await?;
    println!("{}", response.body);
    Ok(())
}

async fn run_capture(settings: Settings) -> Result<()> {
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    storage.health_check().await?;

    let commands = CommandClient::new(&settings.command_base_url, settings.command_timeout())?;
    let coordinator = SessionCoordinator::new(Arc::new(storage), Arc::new(commands));

    let transport = FrameTransport::new(
        TransportConfig::new(&settings.frame_socket_url)?
            .with_reconnect_delay(settings.reconnect_delay()),
    );
    let transport_events = transport.register_consumer();
    transport.connect();

    let (sensors, console_enabled) = open_sensor_stream(settings.sensor_device.as_deref()).await?;
    let dispatch = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.run(transport_events, sensors).await })
    };
    let reporter = tokio::spawn(log_events(coordinator.subscribe_events()));

    info!(
        frame_socket = %settings.frame_socket_url,
        command_base = %settings.command_base_url,
        %database_url,
        "capture rig running"
    );

    if console_enabled {
        println!("{HELP}");
        run_console(&coordinator).await?;
    } else {
        info!("sensor lines are read from stdin; press Ctrl-C to exit");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
    }

    coordinator.stop().await;
    transport.close().await;
    dispatch.abort();
    reporter.abort();
    info!("capture rig stopped");
    Ok(())
}

/// The second value says whether stdin is still free for the console.
async fn open_sensor_stream(device: Option<&str>) -> Result<(SensorStream, bool)> {
    match device {
        None => {
            warn!("no sensor device configured; sensor readings are disabled");
            Ok((Box::pin(tokio_stream::empty()), true))
        }
        Some("-") => {
            let source = SensorSource::new(tokio::io::stdin(), "stdin");
            Ok((Box::pin(source.into_stream()), false))
        }
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open sensor device '{path}'"))?;
            let source = SensorSource::new(file, path);
            Ok((Box::pin(source.into_stream()), true))
        }
    }
}

async fn run_console(coordinator: &SessionCoordinator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read console input")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                None
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => return Ok(()),
            Ok(command) => apply_console_command(coordinator, command).await,
            Err(err) => println!("{err}"),
        }
    }
}

async fn apply_console_command(coordinator: &SessionCoordinator, command: ConsoleCommand) {
    let remote = match command {
        ConsoleCommand::Start { name } => {
            let name = name.unwrap_or_else(|| default_session_name(chrono::Local::now()));
            match coordinator.start(&name).await {
                Ok(session_id) => println!("session {session_id} '{name}' started"),
                Err(err) => println!("{err}"),
            }
            return;
        }
        ConsoleCommand::Stop => {
            match coordinator.stop().await {
                Some(session_id) => println!("session {session_id} stopped"),
                None => println!("no active session"),
            }
            return;
        }
        ConsoleCommand::State => {
            println!("{}", describe_state(&coordinator.state()));
            return;
        }
        ConsoleCommand::Help => {
            println!("{HELP}");
            return;
        }
        ConsoleCommand::Quit => return,
        ConsoleCommand::Status => RemoteCommand::GetStatus,
        ConsoleCommand::Reconnect => RemoteCommand::ReconnectCamera,
        ConsoleCommand::Trigger { enable } => RemoteCommand::SetHardwareTrigger { enable },
        ConsoleCommand::Laser { on } => RemoteCommand::SetLaser { on },
        ConsoleCommand::Stream { start: true } => RemoteCommand::StartStream,
        ConsoleCommand::Stream { start: false } => RemoteCommand::StopStream,
    };

    match coordinator.execute(remote).await {
        Ok(response) => println!("{}", response.body),
        Err(err) => println!("{err}"),
    }
}

fn describe_state(state: &ActiveSessionState) -> String {
    match (state.session_id(), state.name()) {
        (Some(session_id), Some(name)) => format!("active: session {session_id} '{name}'"),
        _ => "idle".to_string(),
    }
}

async fn log_events(mut events: broadcast::Receiver<CoordinatorEvent>) {
    loop {
        match events.recv().await {
            Ok(CoordinatorEvent::SessionStateChanged(state)) => {
                info!(state = %describe_state(&state), "session state changed");
            }
            Ok(CoordinatorEvent::LinkStateChanged { connected }) => {
                info!(connected, "frame link state changed");
            }
            Ok(CoordinatorEvent::SensorReading { session_id, sample }) => {
                tracing::debug!(
                    session_id = ?session_id,
                    ekg = sample.ekg,
                    pressure = sample.pressure,
                    "sensor reading"
                );
            }
            Ok(CoordinatorEvent::Failure(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
