//! Persistent websocket link to the capture server's frame socket.
//!
//! A supervisor task owns the socket. It reports connection lifecycle and
//! inbound text on a single consumer channel and reconnects after a fixed
//! delay whenever the peer drops the link. A deliberate [`FrameTransport::close`]
//! cancels the supervisor, including any pending reconnect timer.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const EVENT_BUFFER: usize = 1024;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: Url,
    pub reconnect_delay: Duration,
}

impl TransportConfig {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid frame socket url: {url}"))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(anyhow!("frame socket url must start with ws:// or wss://: {url}"));
        }
        Ok(Self {
            url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        })
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// `reconnect_in` is `None` only when the link was closed locally.
    Disconnected {
        reason: String,
        reconnect_in: Option<Duration>,
    },
    MessageReceived(String),
}

enum LinkClosed {
    Locally,
    Remotely(String),
}

struct Shared {
    consumer: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected: AtomicBool,
}

impl Shared {
    async fn emit(&self, event: TransportEvent) {
        let consumer = lock(&self.consumer).clone();
        match consumer {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    debug!("frame transport consumer dropped; event discarded");
                }
            }
            None => debug!("no frame transport consumer registered; event discarded"),
        }
    }
}

struct Supervisor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct FrameTransport {
    config: TransportConfig,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl FrameTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                consumer: Mutex::new(None),
                outbound: Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Registers the single consumer of transport events. A later call
    /// replaces the earlier consumer, whose receiver then closes.
    pub fn register_consumer(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        *lock(&self.shared.consumer) = Some(tx);
        rx
    }

    /// Starts the connection supervisor. Calling it while the supervisor is
    /// already running is a no-op.
    pub fn connect(&self) {
        let mut guard = lock(&self.supervisor);
        if guard.as_ref().is_some_and(|s| !s.task.is_finished()) {
            debug!(url = %self.config.url, "frame transport already running");
            return;
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(
            self.config.clone(),
            Arc::clone(&self.shared),
            shutdown_rx,
        ));
        *guard = Some(Supervisor { shutdown, task });
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Queues a text message for the server. Returns `false`, after logging,
    /// when no connection is open.
    pub fn send(&self, text: impl Into<String>) -> bool {
        let outbound = lock(&self.shared.outbound);
        let Some(tx) = outbound.as_ref() else {
            warn!("frame socket is not open; dropping outbound message");
            return false;
        };
        if tx.send(Message::Text(text.into())).is_err() {
            warn!("frame socket writer is gone; dropping outbound message");
            return false;
        }
        true
    }

    /// Closes the link on our side. No reconnect is scheduled afterwards.
    pub async fn close(&self) {
        let supervisor = lock(&self.supervisor).take();
        let Some(Supervisor {
            shutdown,
            mut task,
        }) = supervisor
        else {
            return;
        };
        let _ = shutdown.send(true);
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            warn!("frame transport supervisor did not stop in time; aborting");
            task.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        info!(url = %self.config.url, "frame transport closed");
    }
}

impl Drop for FrameTransport {
    fn drop(&mut self) {
        if let Some(supervisor) = lock(&self.supervisor).take() {
            let _ = supervisor.shutdown.send(true);
        }
    }
}

async fn supervise(
    config: TransportConfig,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u64 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }
        attempt += 1;
        let connected = tokio::select! {
            result = connect_async(config.url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        let reason = match connected {
            Ok((stream, _)) => {
                info!(url = %config.url, attempt, "frame socket connected");
                attempt = 0;
                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&shared.outbound) = Some(tx);
                shared.connected.store(true, Ordering::SeqCst);
                shared.emit(TransportEvent::Connected).await;

                let closed = pump(stream, rx, &shared, &mut shutdown).await;

                shared.connected.store(false, Ordering::SeqCst);
                lock(&shared.outbound).take();
                match closed {
                    LinkClosed::Locally => {
                        shared
                            .emit(TransportEvent::Disconnected {
                                reason: "closed locally".to_string(),
                                reconnect_in: None,
                            })
                            .await;
                        break;
                    }
                    LinkClosed::Remotely(reason) => reason,
                }
            }
            Err(err) => format!("connect failed: {err}"),
        };

        warn!(
            url = %config.url,
            %reason,
            attempt,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "frame socket closed; scheduling reconnect"
        );
        shared
            .emit(TransportEvent::Disconnected {
                reason,
                reconnect_in: Some(config.reconnect_delay),
            })
            .await;

        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!(url = %config.url, "frame transport supervisor stopped");
}

async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> LinkClosed {
    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = writer.send(Message::Close(None)).await;
                return LinkClosed::Locally;
            }
            Some(message) = outbound.recv() => {
                if let Err(err) = writer.send(message).await {
                    return LinkClosed::Remotely(format!("send failed: {err}"));
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    shared.emit(TransportEvent::MessageReceived(text)).await;
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => shared.emit(TransportEvent::MessageReceived(text)).await,
                    Err(_) => warn!("dropping non-utf8 binary frame from frame socket"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("peer closed ({}): {}", f.code, f.reason))
                        .unwrap_or_else(|| "peer closed".to_string());
                    return LinkClosed::Remotely(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return LinkClosed::Remotely(format!("receive failed: {err}")),
                None => return LinkClosed::Remotely("stream ended".to_string()),
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
