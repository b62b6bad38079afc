//! WebSocket session client for connecting to the canvas relay.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - A local canvas replica kept in sync with the room document
//! - Stroke editing that exports updates to the relay
//! - An apply-from-network guard so inbound merges never re-export
//!
//! The guard is the client half of echo suppression: while a network frame
//! is being merged into the local replica, outbound update sends are
//! suppressed. The server half is sender-id filtering in the relay loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::canvas::{CanvasDoc, CanvasError, Stroke};
use crate::protocol::{MessageType, ProtocolError, RelayMessage};

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the session client.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection established and room joined
    Connected,
    /// Connection lost
    Disconnected,
    /// Full room state merged into the local replica
    Synced,
    /// A remote update was merged into the local replica
    RemoteUpdate { user_id: Uuid },
    /// The room canvas was reset
    CanvasCleared,
    /// A peer joined the room
    UserJoined { user_id: Uuid, users_count: u64 },
    /// A peer left the room
    UserLeft { user_id: Uuid, users_count: u64 },
    /// Occupancy heartbeat
    UserCount(u64),
}

/// Session client errors.
#[derive(Debug)]
pub enum SessionError {
    Canvas(CanvasError),
    Protocol(ProtocolError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Canvas(e) => write!(f, "Canvas error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<CanvasError> for SessionError {
    fn from(e: CanvasError) -> Self {
        Self::Canvas(e)
    }
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// The session client.
///
/// Owns a local canvas replica and a WebSocket connection to the relay.
/// Local stroke edits mutate the replica first and ship the cumulative
/// update; inbound frames merge into the replica under the apply guard.
pub struct SessionClient {
    /// Local session identity (client-side bookkeeping only; the relay
    /// stamps frames with its own transport-assigned id)
    session_id: Uuid,

    /// Room this session draws in
    room_id: String,

    /// Local canvas replica
    canvas: Arc<RwLock<CanvasDoc>>,

    /// Connection state
    state: Arc<RwLock<SessionState>>,

    /// Set while a network frame is being merged into the replica
    applying_remote: Arc<AtomicBool>,

    /// Whether the initial room snapshot has been merged
    synced: Arc<AtomicBool>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SessionEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<SessionEvent>,

    /// Relay URL
    server_url: String,
}

impl SessionClient {
    /// Create a new session client for a room.
    pub fn new(room_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            session_id: Uuid::new_v4(),
            room_id: room_id.into(),
            canvas: Arc::new(RwLock::new(CanvasDoc::new())),
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            applying_remote: Arc::new(AtomicBool::new(false)),
            synced: Arc::new(AtomicBool::new(false)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Connect to the relay and join the room.
    ///
    /// Spawns background tasks for reading/writing WebSocket frames. The
    /// relay answers the join with a full `SyncState` snapshot, which the
    /// reader task merges under the apply guard.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = SessionState::Connecting;
        self.synced.store(false, Ordering::SeqCst);

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;

        match ws_result {
            Ok((ws_stream, _)) => {
                // Disable Nagle so rapid small updates leave immediately
                // instead of stalling behind delayed ACKs.
                if let tokio_tungstenite::MaybeTlsStream::Plain(tcp) = ws_stream.get_ref() {
                    let _ = tcp.set_nodelay(true);
                }
                let (ws_writer, mut ws_reader) = futures_util::StreamExt::split(ws_stream);

                // Outgoing frame channel
                let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
                self.outgoing_tx = Some(out_tx);

                // Writer task: forward outgoing channel to WebSocket. When
                // the channel closes (disconnect or drop) the peer gets a
                // proper Close frame so the relay's cleanup runs promptly.
                let writer = Arc::new(tokio::sync::Mutex::new(ws_writer));
                tokio::spawn(async move {
                    use futures_util::SinkExt;
                    while let Some(data) = out_rx.recv().await {
                        let mut w = writer.lock().await;
                        if w.send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    let mut w = writer.lock().await;
                    let _ = w
                        .send(tokio_tungstenite::tungstenite::Message::Close(None))
                        .await;
                });

                // Join the room
                let join = RelayMessage::join_room(self.session_id, &self.room_id);
                if let Ok(encoded) = join.encode() {
                    if let Some(ref tx) = self.outgoing_tx {
                        let _ = tx.send(encoded).await;
                    }
                }

                *self.state.write().await = SessionState::Connected;
                let _ = self.event_tx.send(SessionEvent::Connected).await;

                // Reader task: merge inbound frames into the replica
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                let canvas = self.canvas.clone();
                let applying_remote = self.applying_remote.clone();
                let synced = self.synced.clone();
                let session_id = self.session_id;
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                                let bytes: Vec<u8> = data.into();
                                let frame = match RelayMessage::decode(&bytes) {
                                    Ok(frame) => frame,
                                    Err(e) => {
                                        log::warn!("Failed to decode relay frame: {e}");
                                        continue;
                                    }
                                };

                                // Echo defense on top of the relay's own
                                // sender filtering
                                if frame.sender_id == session_id {
                                    continue;
                                }

                                let event = match frame.msg_type {
                                    MessageType::SyncState => {
                                        applying_remote.store(true, Ordering::SeqCst);
                                        let result =
                                            canvas.read().await.apply_update(&frame.payload);
                                        applying_remote.store(false, Ordering::SeqCst);

                                        match result {
                                            // Synced fires once per connection;
                                            // re-requested snapshots surface as
                                            // ordinary remote updates
                                            Ok(()) => {
                                                if synced.swap(true, Ordering::SeqCst) {
                                                    Some(SessionEvent::RemoteUpdate {
                                                        user_id: frame.sender_id,
                                                    })
                                                } else {
                                                    Some(SessionEvent::Synced)
                                                }
                                            }
                                            Err(e) => {
                                                log::warn!("Failed to merge snapshot: {e}");
                                                None
                                            }
                                        }
                                    }

                                    MessageType::Update => {
                                        applying_remote.store(true, Ordering::SeqCst);
                                        let result =
                                            canvas.read().await.apply_update(&frame.payload);
                                        applying_remote.store(false, Ordering::SeqCst);

                                        match result {
                                            Ok(()) => Some(SessionEvent::RemoteUpdate {
                                                user_id: frame.sender_id,
                                            }),
                                            Err(e) => {
                                                log::warn!("Failed to merge remote update: {e}");
                                                None
                                            }
                                        }
                                    }

                                    MessageType::ClearCanvas => {
                                        applying_remote.store(true, Ordering::SeqCst);
                                        canvas.write().await.clear();
                                        applying_remote.store(false, Ordering::SeqCst);
                                        Some(SessionEvent::CanvasCleared)
                                    }

                                    MessageType::UserJoined => {
                                        frame.occupancy().ok().map(|o| {
                                            SessionEvent::UserJoined {
                                                user_id: o.user_id,
                                                users_count: o.users_count,
                                            }
                                        })
                                    }

                                    MessageType::UserLeft => {
                                        frame.occupancy().ok().map(|o| SessionEvent::UserLeft {
                                            user_id: o.user_id,
                                            users_count: o.users_count,
                                        })
                                    }

                                    MessageType::UserCount => {
                                        frame.users_count().ok().map(SessionEvent::UserCount)
                                    }

                                    _ => None,
                                };

                                if let Some(evt) = event {
                                    let _ = event_tx.send(evt).await;
                                }
                            }
                            Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                                break;
                            }
                            _ => {}
                        }
                    }

                    // Connection lost
                    *state.write().await = SessionState::Disconnected;
                    let _ = event_tx.send(SessionEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = SessionState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Start a new stroke on the local replica and ship the update.
    ///
    /// Returns the stroke id for subsequent extension.
    pub async fn begin_stroke(
        &self,
        color: &str,
        width: f32,
        x: f32,
        y: f32,
    ) -> Result<Uuid, SessionError> {
        let (stroke_id, update) = {
            let canvas = self.canvas.read().await;
            canvas.begin_stroke(color, width, x, y)?
        };
        self.send_update(update).await;
        Ok(stroke_id)
    }

    /// Append a point to a stroke on the local replica and ship the update.
    pub async fn extend_stroke(&self, stroke_id: Uuid, x: f32, y: f32) -> Result<(), SessionError> {
        let update = {
            let canvas = self.canvas.read().await;
            canvas.extend_stroke(stroke_id, x, y)?
        };
        self.send_update(update).await;
        Ok(())
    }

    /// Reset the local canvas and signal the room.
    ///
    /// The local reset happens immediately; the relay's echo of the signal
    /// is idempotent against an already-empty replica.
    pub async fn clear_canvas(&self) {
        self.canvas.write().await.clear();
        let msg = RelayMessage::clear_canvas(self.session_id, &self.room_id);
        self.send_frame(msg).await;
    }

    /// Request a fresh full snapshot from the relay.
    pub async fn request_sync(&self) {
        let msg = RelayMessage::sync(self.session_id, &self.room_id);
        self.send_frame(msg).await;
    }

    /// Ship exported replica state as an update frame.
    ///
    /// Suppressed while a network frame is being merged, and silently
    /// dropped while disconnected: the local replica already holds the
    /// edit and the next join re-syncs from the room document.
    async fn send_update(&self, update: Vec<u8>) {
        if self.applying_remote.load(Ordering::SeqCst) {
            return;
        }
        let msg = RelayMessage::update(self.session_id, &self.room_id, update);
        self.send_frame(msg).await;
    }

    async fn send_frame(&self, msg: RelayMessage) {
        if *self.state.read().await != SessionState::Connected {
            log::debug!("Dropping {:?} frame while disconnected", msg.msg_type);
            return;
        }
        let encoded = match msg.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                log::warn!("Failed to encode outbound frame: {e}");
                return;
            }
        };
        if let Some(ref tx) = self.outgoing_tx {
            let _ = tx.send(encoded).await;
        }
    }

    /// Close the connection.
    ///
    /// Dropping the client has the same effect; this just makes it
    /// explicit and immediate.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = SessionState::Disconnected;
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> SessionState {
        *self.state.read().await
    }

    /// All strokes currently on the local replica.
    pub async fn strokes(&self) -> Vec<Stroke> {
        self.canvas.read().await.strokes()
    }

    /// Number of strokes on the local replica.
    pub async fn stroke_count(&self) -> usize {
        self.canvas.read().await.stroke_count()
    }

    /// Whether a network merge is in progress.
    pub fn applying_remote(&self) -> bool {
        self.applying_remote.load(Ordering::SeqCst)
    }

    /// Get the session id.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Get the room id.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Get the relay URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
