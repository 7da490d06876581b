//! Outbound WebSocket relay to the main app.
//!
//! One connection per session, used as a one-way event emitter. Delivery is
//! best-effort: frames sent while the socket is not open are dropped, never
//! queued. When an open (or opening) socket goes away, exactly one reconnect
//! is scheduled after [`RECONNECT_DELAY`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Fixed delay between a dropped connection and the next attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Handle to the relay. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    url: String,
    state: Mutex<RelayState>,
}

#[derive(Default)]
struct RelayState {
    connection: Option<RelayConnection>,
    reconnect_timer: Option<JoinHandle<()>>,
    generation: u64,
}

/// A single WebSocket connection attempt and, once open, its writer queue.
#[derive(Clone)]
pub struct RelayConnection {
    generation: u64,
    open: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl RelayConnection {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn transmit(&self, frame: Message) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

impl Relay {
    /// Create a relay for `url`. Nothing connects until [`Relay::connect`] or
    /// [`Relay::send`] is called.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                url: url.into(),
                state: Mutex::new(RelayState::default()),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RelayState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the current connection, starting a new one if there is none.
    ///
    /// A connection that is still opening counts as current, so repeated
    /// calls never pile up parallel sockets.
    pub fn connect(&self) -> RelayConnection {
        let mut state = self.lock_state();
        if let Some(connection) = &state.connection {
            return connection.clone();
        }

        state.generation += 1;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connection = RelayConnection {
            generation: state.generation,
            open: Arc::new(AtomicBool::new(false)),
            outbound,
        };
        state.connection = Some(connection.clone());
        drop(state);

        info!(url = %redact(&self.inner.url), "Connecting to main app WebSocket");
        tokio::spawn(self.clone().run_connection(connection.clone(), outbound_rx));
        connection
    }

    /// Serialize `event` and hand it to the open socket.
    ///
    /// Returns `false` when the event was dropped. Never blocks on the
    /// network and never fails the caller.
    pub fn send<T: Serialize>(&self, event: &T) -> bool {
        let connection = self.connect();
        if !connection.is_open() {
            warn!("WebSocket not ready, chunk dropped");
            return false;
        }

        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize relay event");
                return false;
            }
        };

        if connection.transmit(Message::Text(text.into())) {
            true
        } else {
            warn!("WebSocket closed while sending, chunk dropped");
            false
        }
    }

    /// Cancel any pending reconnect and close the live connection.
    ///
    /// The relay stays usable: the next `connect` or `send` starts over.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(connection) = state.connection.take() {
            connection.open.store(false, Ordering::Release);
            let _ = connection.transmit(Message::Close(None));
        }
        info!("Main app WebSocket shut down");
    }

    pub fn is_open(&self) -> bool {
        self.lock_state()
            .connection
            .as_ref()
            .is_some_and(RelayConnection::is_open)
    }

    pub fn reconnect_pending(&self) -> bool {
        self.lock_state().reconnect_timer.is_some()
    }

    /// Arm the reconnect timer unless one is already armed.
    fn schedule_reconnect(&self) -> bool {
        let mut state = self.lock_state();
        if state.reconnect_timer.is_some() {
            return false;
        }

        let relay = self.clone();
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            relay.lock_state().reconnect_timer = None;
            relay.connect();
        }));
        true
    }

    /// Promote `connection` to open if it is still the current one.
    fn mark_open(&self, connection: &RelayConnection) -> bool {
        let mut state = self.lock_state();
        let current = state
            .connection
            .as_ref()
            .is_some_and(|c| c.generation == connection.generation);
        if !current {
            return false;
        }

        connection.open.store(true, Ordering::Release);
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        true
    }

    fn handle_close(&self, generation: u64) {
        let mut state = self.lock_state();
        let current = state
            .connection
            .as_ref()
            .is_some_and(|c| c.generation == generation);
        if !current {
            debug!(generation, "Superseded WebSocket connection closed");
            return;
        }
        state.connection = None;
        drop(state);

        info!(
            delay_secs = RECONNECT_DELAY.as_secs(),
            "WebSocket disconnected, scheduling reconnect"
        );
        self.schedule_reconnect();
    }

    async fn run_connection(
        self,
        connection: RelayConnection,
        mut outbound: mpsc::UnboundedReceiver<Message>,
    ) {
        match connect_async(self.inner.url.as_str()).await {
            Ok((mut stream, _)) => {
                if !self.mark_open(&connection) {
                    let _ = stream.close(None).await;
                    return;
                }
                info!("WebSocket connected to main app");

                let (mut sink, mut source) = stream.split();
                loop {
                    tokio::select! {
                        frame = outbound.recv() => {
                            let Some(frame) = frame else { break };
                            let closing = matches!(frame, Message::Close(_));
                            if let Err(e) = sink.send(frame).await {
                                error!(error = %e, "Failed to write to main app WebSocket");
                                break;
                            }
                            if closing {
                                break;
                            }
                        }
                        incoming = source.next() => match incoming {
                            Some(Ok(Message::Text(text))) => log_incoming(text.as_str()),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!(error = %e, "Main app WebSocket error");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to main app WebSocket");
            }
        }

        connection.open.store(false, Ordering::Release);
        self.handle_close(connection.generation);
    }
}

fn log_incoming(text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => {
            let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
            debug!(kind, "Received WebSocket message from main app");
        }
        Err(e) => warn!(error = %e, "Failed to parse WebSocket message from main app"),
    }
}

/// Strip the query string so the session token never reaches the logs.
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
