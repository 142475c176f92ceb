//! Session state machine and ingestion path.
//!
//! `start`/`stop` are the only writers of [`ActiveSessionState`] and are
//! serialized by a transition lock. Ingestion never takes that lock: each
//! frame or reading reads one snapshot of the state and uses it for the whole
//! persistence call.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{NewSensorReading, NewSession, NewSessionFile, SensorReadingId, SessionFileId, SessionId},
    protocol::Frame,
};
use storage::SessionStore;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::{
    command_client::{CommandPlane, CommandResponse, RemoteCommand},
    dispatcher::FrameDispatcher,
    error::{CoreError, ErrorKind, RemoteCommandError},
    transport::TransportEvent,
    types::{ActiveSessionState, CoordinatorEvent, SensorSample},
};

const EVENT_CAPACITY: usize = 1024;

pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    commands: Arc<dyn CommandPlane>,
    dispatcher: FrameDispatcher,
    state: watch::Sender<ActiveSessionState>,
    events: broadcast::Sender<CoordinatorEvent>,
    transitions: Mutex<()>,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn SessionStore>, commands: Arc<dyn CommandPlane>) -> Arc<Self> {
        let (state, _) = watch::channel(ActiveSessionState::idle());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            store,
            commands,
            dispatcher: FrameDispatcher::new(),
            state,
            events,
            transitions: Mutex::new(()),
        })
    }

    pub fn dispatcher(&self) -> &FrameDispatcher {
        &self.dispatcher
    }

    pub fn state(&self) -> ActiveSessionState {
        self.state.borrow().clone()
    }

    /// The receiver starts at the current state and sees every transition.
    pub fn watch_state(&self) -> watch::Receiver<ActiveSessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Opens a session: persists it, switches to Active, then tells the
    /// capture server. Remote failures are reported but leave the session
    /// open.
    pub async fn start(&self, name: &str) -> Result<SessionId, CoreError> {
        let _transition = self.transitions.lock().await;

        let current = self.state();
        if let Some(active_id) = current.session_id() {
            let err = CoreError::SessionAlreadyActive(format!(
                "{} ({active_id})",
                current.name().unwrap_or_default()
            ));
            warn!(%err, requested = name, "rejecting session start");
            return Err(err);
        }

        let session_id = self
            .store
            .create_session(&NewSession {
                name: name.to_string(),
                start_time: Utc::now(),
            })
            .await
            .map_err(|err| self.report(CoreError::persistence("create_session", err)))?;

        let active = ActiveSessionState::active(session_id, name);
        self.state.send_replace(active.clone());
        let _ = self.events.send(CoordinatorEvent::SessionStateChanged(active));
        info!(session_id = %session_id, name, "capture session started");

        let (session, stream) = tokio::join!(
            self.commands.execute(RemoteCommand::StartSession {
                name: name.to_string(),
            }),
            self.commands.execute(RemoteCommand::StartStream),
        );
        self.settle_command(session);
        self.settle_command(stream);

        Ok(session_id)
    }

    /// Closes the active session and returns its id, or `None` (after a
    /// warning, with no side effects) when no session is open.
    pub async fn stop(&self) -> Option<SessionId> {
        let _transition = self.transitions.lock().await;

        let Some(session_id) = self.state().session_id() else {
            warn!("stop requested with no active session; ignoring");
            return None;
        };

        let (session, stream) = tokio::join!(
            self.commands.execute(RemoteCommand::StopSession),
            self.commands.execute(RemoteCommand::StopStream),
        );
        self.settle_command(session);
        self.settle_command(stream);

        if let Err(err) = self.store.end_session(session_id, Utc::now()).await {
            self.report(CoreError::persistence("end_session", err));
        }

        let idle = ActiveSessionState::idle();
        self.state.send_replace(idle.clone());
        let _ = self.events.send(CoordinatorEvent::SessionStateChanged(idle));
        info!(session_id = %session_id, "capture session stopped");

        Some(session_id)
    }

    /// Runs one remote command outside the session transitions. Failures are
    /// reported on the event channel as well as returned.
    pub async fn execute(&self, command: RemoteCommand) -> Result<CommandResponse, CoreError> {
        self.commands
            .execute(command)
            .await
            .map_err(|err| self.report(err.into()))
    }

    pub async fn reconnect_camera(&self) -> Result<CommandResponse, CoreError> {
        self.execute(RemoteCommand::ReconnectCamera).await
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let _ = self
                    .events
                    .send(CoordinatorEvent::LinkStateChanged { connected: true });
            }
            TransportEvent::Disconnected {
                reason,
                reconnect_in,
            } => {
                let _ = self
                    .events
                    .send(CoordinatorEvent::LinkStateChanged { connected: false });
                match reconnect_in {
                    Some(delay) => {
                        self.report(CoreError::Transport(format!(
                            "{reason}; reconnecting in {}s",
                            delay.as_secs_f32()
                        )));
                    }
                    None => debug!(%reason, "frame link closed"),
                }
            }
            TransportEvent::MessageReceived(raw) => {
                self.ingest_message(&raw).await;
            }
        }
    }

    /// Dispatches one raw frame-socket message and records it against the
    /// active session. Returns the new file record id when one was written.
    pub async fn ingest_message(&self, raw: &str) -> Option<SessionFileId> {
        match self.dispatcher.on_message(raw) {
            Ok(frame) => self.ingest_frame(&frame).await,
            Err(err) => {
                self.report(err);
                None
            }
        }
    }

    pub async fn ingest_frame(&self, frame: &Frame) -> Option<SessionFileId> {
        let (Some(file_type), Some(file_path)) = (frame.file_kind(), frame.file_path()) else {
            return None;
        };
        let snapshot = self.state();
        let Some(session_id) = snapshot.session_id() else {
            warn!(%file_path, "frame arrived with no active session; dropping");
            return None;
        };

        let record = NewSessionFile {
            session_id,
            file_path,
            file_type,
            created_at: Utc::now(),
        };
        match self.store.insert_session_file(&record).await {
            Ok(file_id) => {
                debug!(
                    session_id = %session_id,
                    file_id = %file_id,
                    file_path = %record.file_path,
                    "session file recorded"
                );
                Some(file_id)
            }
            Err(err) => {
                self.report(CoreError::persistence("insert_session_file", err));
                None
            }
        }
    }

    /// Records a reading against the active session, or against no session
    /// while idle, and publishes it for live views.
    pub async fn ingest_sensor_sample(&self, sample: SensorSample) -> Option<SensorReadingId> {
        let session_id = self.state().session_id();
        let _ = self
            .events
            .send(CoordinatorEvent::SensorReading { session_id, sample });

        let reading = NewSensorReading {
            session_id,
            ekg: sample.ekg,
            pressure: sample.pressure,
            timestamp: sample.timestamp,
        };
        match self.store.insert_sensor_reading(&reading).await {
            Ok(reading_id) => Some(reading_id),
            Err(err) => {
                self.report(CoreError::persistence("insert_sensor_reading", err));
                None
            }
        }
    }

    /// The dispatch loop: handles transport events and sensor samples one at
    /// a time until both inputs are exhausted.
    pub async fn run<S>(&self, mut transport: mpsc::Receiver<TransportEvent>, sensors: S)
    where
        S: Stream<Item = SensorSample> + Unpin,
    {
        let mut sensors = sensors.fuse();
        let mut transport_open = true;
        let mut sensors_open = true;
        while transport_open || sensors_open {
            tokio::select! {
                event = transport.recv(), if transport_open => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => {
                        debug!("frame transport consumer closed");
                        transport_open = false;
                    }
                },
                sample = sensors.next(), if sensors_open => match sample {
                    Some(sample) => {
                        self.ingest_sensor_sample(sample).await;
                    }
                    None => {
                        info!("sensor stream ended");
                        sensors_open = false;
                    }
                },
            }
        }
        debug!("coordinator dispatch loop finished");
    }

    fn settle_command(&self, result: Result<CommandResponse, RemoteCommandError>) {
        match result {
            Ok(response) => debug!(status = response.status, "remote command acknowledged"),
            Err(err) => {
                self.report(err.into());
            }
        }
    }

    fn report(&self, err: CoreError) -> CoreError {
        match err.kind() {
            ErrorKind::Persistence | ErrorKind::RemoteCommand => error!(kind = ?err.kind(), "{err}"),
            _ => warn!(kind = ?err.kind(), "{err}"),
        }
        let _ = self.events.send(CoordinatorEvent::Failure((&err).into()));
        err
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
