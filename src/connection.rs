//! Connection manager
//!
//! Owns the single duplex link to the analysis backend. One manager holds at
//! most one transport at a time: calling [`ConnectionManager::connect`] again
//! tears the previous transport down before opening a new one.
//!
//! Inbound text frames are decoded into [`ServerMessage`]s and fanned out
//! through a [`Dispatcher`]. Frames that fail to decode are dropped with a
//! warning. Outbound frames are only accepted while the link is open.

use crate::config::Endpoint;
use crate::dispatcher::{lock, Dispatcher, ListenerHandle};
use crate::error::{MonitorError, SendError};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::ConnectionState;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Commands for the socket I/O task
enum Outbound {
    Text(String),
    Close,
}

/// Where outbound frames go
enum Link {
    Socket(mpsc::UnboundedSender<Outbound>),
    Loopback(mpsc::UnboundedSender<String>),
}

struct Shared {
    state: Mutex<ConnectionState>,
    link: Mutex<Option<Link>>,
    /// Bumped whenever a transport is replaced or closed, so a finishing
    /// I/O task can tell whether it still owns the connection state.
    generation: AtomicU64,
    messages: Dispatcher<ServerMessage>,
    states: Dispatcher<ConnectionState>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = lock(&self.state);
            if *state == next {
                return;
            }
            *state = next;
        }
        info!(state = next.as_str(), "connection state changed");
        self.states.dispatch(&next);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn deliver(&self, text: &str) -> bool {
        if self.state() != ConnectionState::Open {
            debug!(len = text.len(), "dropping frame received while not open");
            return false;
        }

        match ServerMessage::decode(text) {
            Ok(message) => {
                debug!(kind = message.kind(), "frame received");
                self.messages.dispatch(&message);
                true
            }
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed frame");
                false
            }
        }
    }
}

/// Single process-wide connection to the backend
pub struct ConnectionManager {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Create a manager in the `Closed` state with no transport
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Closed),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                messages: Dispatcher::new(),
                states: Dispatcher::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Open a WebSocket to `endpoint`, replacing any existing transport.
    ///
    /// Moves to `Open` on success. On failure the state becomes `Failed` and
    /// the handshake error is returned; nothing is retried here.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<(), MonitorError> {
        self.teardown();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(ConnectionState::Connecting);

        let url = endpoint.url();
        info!(url = %url, "connecting");

        let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(url = %url, error = %e, "connect failed");
                if self.shared.is_current(generation) {
                    self.shared.set_state(ConnectionState::Failed);
                }
                return Err(MonitorError::ConnectError(e.to_string()));
            }
        };

        if !self.shared.is_current(generation) {
            return Err(MonitorError::ConnectError(
                "connection was closed during the handshake".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.shared.link) = Some(Link::Socket(tx));
        self.shared.set_state(ConnectionState::Open);

        let task = tokio::spawn(io_loop(stream, rx, Arc::clone(&self.shared), generation));
        *lock(&self.task) = Some(task);
        Ok(())
    }

    /// Open an in-memory transport.
    ///
    /// Frames passed to [`ConnectionManager::send`] arrive on the returned
    /// receiver; inbound frames are injected with [`ConnectionManager::deliver`].
    pub fn open_loopback(&self) -> mpsc::UnboundedReceiver<String> {
        self.teardown();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.shared.link) = Some(Link::Loopback(tx));
        self.shared.set_state(ConnectionState::Open);
        rx
    }

    /// Queue one control message. Fails with `NotConnected` unless open.
    pub fn send(&self, message: &ClientMessage) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotConnected);
        }

        let text = message
            .encode()
            .map_err(|e| SendError::Encode(e.to_string()))?;

        let link = lock(&self.shared.link);
        let sent = match link.as_ref() {
            Some(Link::Socket(tx)) => tx.send(Outbound::Text(text)).is_ok(),
            Some(Link::Loopback(tx)) => tx.send(text).is_ok(),
            None => false,
        };

        if sent {
            debug!(kind = message.kind(), "frame queued");
            Ok(())
        } else {
            Err(SendError::NotConnected)
        }
    }

    /// Decode and dispatch one inbound text frame.
    ///
    /// Returns `false` if the frame was dropped (malformed, or not open).
    pub fn deliver(&self, text: &str) -> bool {
        self.shared.deliver(text)
    }

    /// Register a handler for every decoded inbound message
    pub fn on_message<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        self.shared.messages.add_listener(handler)
    }

    /// Register a handler for connection state transitions
    pub fn on_state_change<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.shared.states.add_listener(handler)
    }

    /// Resolve once the current transport ends, with `Closed` or `Failed`.
    ///
    /// Only transitions after the call count; a `Failed` left over from an
    /// earlier attempt is ignored while the link is open. Returns at once if
    /// there is no open or pending transport.
    pub async fn wait_until_ended(&self) -> ConnectionState {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = self
            .on_state_change(move |state| {
                if matches!(state, ConnectionState::Closed | ConnectionState::Failed) {
                    let _ = tx.send(*state);
                }
            })
            .into_guard();

        match self.state() {
            ConnectionState::Open | ConnectionState::Connecting => {
                rx.recv().await.unwrap_or(ConnectionState::Closed)
            }
            ended => ended,
        }
    }

    /// Close the transport. A socket gets a close frame if it is still
    /// writable. Idempotent.
    pub fn close(&self) {
        let had_link = self.teardown();
        if had_link {
            info!("connection closed by client");
        }
        self.shared.set_state(ConnectionState::Closed);
    }

    /// Detach the current transport. Returns whether one existed.
    fn teardown(&self) -> bool {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let link = lock(&self.shared.link).take();
        // The I/O task finishes on its own after flushing the close frame
        drop(lock(&self.task).take());

        match link {
            Some(Link::Socket(tx)) => {
                let _ = tx.send(Outbound::Close);
                true
            }
            Some(Link::Loopback(_)) => true,
            None => false,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(Link::Socket(tx)) = lock(&self.shared.link).take() {
            let _ = tx.send(Outbound::Close);
        }
        debug!(generation, "connection manager dropped");
    }
}

/// Pump frames between the socket and the shared state until either side ends
async fn io_loop(
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
    generation: u64,
) {
    let (mut sink, mut reader) = stream.split();

    let end_state = loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if shared.is_current(generation) {
                        shared.deliver(&text);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "closed by peer");
                    break ConnectionState::Closed;
                }
                None => {
                    info!("stream ended");
                    break ConnectionState::Closed;
                }
                Some(Ok(_)) => {} // binary, ping, pong
                Some(Err(e)) => {
                    warn!(error = %e, "read failed");
                    break ConnectionState::Failed;
                }
            },
            command = outbound.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(error = %e, "write failed");
                        break ConnectionState::Failed;
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!(error = %e, "close frame not sent");
                    }
                    let _ = sink.close().await;
                    break ConnectionState::Closed;
                }
            },
        }
    };

    if shared.is_current(generation) {
        lock(&shared.link).take();
        shared.set_state(end_state);
    }
}
