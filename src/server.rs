//! WebSocket relay server with room-based document routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (room_id) ── Yrs Doc ── BroadcastGroup
//! Client B ──┘         │
//!                      ├── UpdateThrottle (per-connection debounce)
//!                      │
//!           ┌──────────┼───────────┐
//!           ▼          ▼           ▼
//!        Client A   Client B    Client C
//! ```
//!
//! Every connection runs one task with a `select!` loop over its inbound
//! WebSocket frames and its room's broadcast receiver. Inbound updates are
//! merged into the room's authoritative document before being relayed, so
//! the server always holds the full canvas for late joiners. Self-echo is
//! suppressed server-side: relayed frames are stamped with the
//! transport-assigned connection id and each connection's loop skips frames
//! stamped with its own id.
//!
//! A background task ticks every heartbeat interval, pushing a `UserCount`
//! frame into each room and sweeping idle rooms when a TTL policy is
//! configured.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::protocol::{MessageType, RelayMessage};
use crate::registry::{ApplyOutcome, EvictionPolicy, RoomRegistry};
use crate::throttle::DEFAULT_UPDATE_DEBOUNCE;

/// Default interval between occupancy heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Interval between `UserCount` heartbeats
    pub heartbeat_interval: Duration,
    /// Per-connection debounce window for inbound updates
    pub update_debounce: Duration,
    /// What happens to room documents when the last occupant leaves
    pub eviction: EvictionPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            update_debounce: DEFAULT_UPDATE_DEBOUNCE,
            eviction: EvictionPolicy::Retain,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub updates_relayed: u64,
    pub updates_throttled: u64,
    pub active_rooms: usize,
}

/// The canvas relay server.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    /// Create a new relay server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(
            config.broadcast_capacity,
            config.update_debounce,
            config.eviction,
        ));
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// Runs the accept loop and the heartbeat task. Call from an async
    /// runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);

        self.spawn_heartbeat();

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Spawn the background heartbeat: occupancy broadcasts + idle sweeps.
    fn spawn_heartbeat(&self) {
        let registry = self.registry.clone();
        let interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;

                let swept = registry.sweep_idle().await;
                if swept > 0 {
                    log::debug!("Heartbeat swept {swept} idle rooms");
                }

                for (room_id, count, group) in registry.room_occupancies().await {
                    if count == 0 {
                        continue;
                    }
                    let msg = RelayMessage::user_count(&room_id, count as u64);
                    let _ = group.broadcast(&msg);
                }
            }
        });
    }

    /// Encode and send a frame on a connection's sink.
    ///
    /// Returns `false` when the transport is gone; the caller must break
    /// out of its loop so the disconnect cleanup runs. An encode failure
    /// only drops the frame.
    async fn send_frame(sink: &mut WsSink, msg: &RelayMessage) -> bool {
        let encoded = match msg.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                log::error!("Failed to encode {:?} frame: {e}", msg.msg_type);
                return true;
            }
        };
        sink.send(Message::Binary(encoded.into())).await.is_ok()
    }

    /// Handle a single WebSocket connection.
    ///
    /// Every exit path goes through the cleanup below the loop: a peer
    /// that vanishes mid-send must still be removed from its room.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Sub-frame drawing updates are tiny; without TCP_NODELAY, Nagle
        // batches them behind delayed ACKs and frame arrival times diverge
        // from send times, skewing the debounce window.
        stream.set_nodelay(true)?;
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Transport-assigned identity. Client-claimed sender ids on inbound
        // frames are never trusted for relay stamping.
        let conn_id = Uuid::new_v4();
        log::info!("WebSocket connection {conn_id} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut broadcast_rx: Option<tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let frame = match RelayMessage::decode(&bytes) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {conn_id}: {e}");
                                    continue;
                                }
                            };

                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match frame.msg_type {
                                MessageType::JoinRoom => {
                                    let outcome =
                                        registry.join_room(conn_id, &frame.room_id).await;

                                    // Departure notice for the room left behind
                                    if let Some(prev) = outcome.previous {
                                        let left = RelayMessage::user_left(
                                            conn_id,
                                            &prev.room_id,
                                            prev.users_count as u64,
                                        );
                                        let _ = prev.broadcast.broadcast(&left);
                                    }

                                    // Full state goes to the joiner only
                                    let state = RelayMessage::sync_state(
                                        &frame.room_id,
                                        outcome.snapshot,
                                    );
                                    if !Self::send_frame(&mut ws_sender, &state).await {
                                        break;
                                    }

                                    // The joiner never sees its own UserJoined
                                    // frame, so it gets the count directly
                                    let count = RelayMessage::user_count(
                                        &frame.room_id,
                                        outcome.users_count as u64,
                                    );
                                    if !Self::send_frame(&mut ws_sender, &count).await {
                                        break;
                                    }

                                    // Everyone else learns of the arrival; the
                                    // joiner's own loop filters this frame out
                                    let joined = RelayMessage::user_joined(
                                        conn_id,
                                        &frame.room_id,
                                        outcome.users_count as u64,
                                    );

                                    let _ = outcome.broadcast.broadcast(&joined);
                                    broadcast_rx = Some(outcome.receiver);

                                    log::info!(
                                        "Connection {conn_id} joined room {} ({} users)",
                                        frame.room_id,
                                        outcome.users_count
                                    );
                                }

                                MessageType::Sync => {
                                    // Silent no-op when the room is unknown
                                    if let Some(snapshot) =
                                        registry.snapshot(&frame.room_id).await
                                    {
                                        let state = RelayMessage::sync_state(
                                            &frame.room_id,
                                            snapshot,
                                        );
                                        if !Self::send_frame(&mut ws_sender, &state).await {
                                            break;
                                        }
                                    }
                                }

                                MessageType::Update => {
                                    match registry
                                        .apply_update(conn_id, &frame.room_id, &frame.payload)
                                        .await
                                    {
                                        ApplyOutcome::Relayed(group) => {
                                            // Re-stamp with the trusted id and encode
                                            // exactly once regardless of room size
                                            let relay = RelayMessage::update(
                                                conn_id,
                                                &frame.room_id,
                                                frame.payload,
                                            );
                                            match relay.encode() {
                                                Ok(encoded) => {
                                                    group.broadcast_raw(Arc::new(encoded));
                                                    stats.write().await.updates_relayed += 1;
                                                }
                                                Err(e) => {
                                                    log::error!(
                                                        "Failed to encode relay frame: {e}"
                                                    );
                                                }
                                            }
                                        }
                                        ApplyOutcome::Throttled => {
                                            stats.write().await.updates_throttled += 1;
                                        }
                                        ApplyOutcome::Rejected => {}
                                    }
                                }

                                MessageType::ClearCanvas => {
                                    // Relayed to every occupant, sender included:
                                    // the reset is idempotent on the client side
                                    if let Some(group) =
                                        registry.clear_room(&frame.room_id).await
                                    {
                                        let signal = RelayMessage::clear_canvas(
                                            Uuid::nil(),
                                            &frame.room_id,
                                        );
                                        let _ = group.broadcast(&signal);
                                        log::info!(
                                            "Connection {conn_id} cleared room {}",
                                            frame.room_id
                                        );
                                    }
                                }

                                _ => {
                                    log::debug!(
                                        "Unhandled client frame type: {:?}",
                                        frame.msg_type
                                    );
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection {conn_id} closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {conn_id}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing broadcast frame
                msg = async {
                    if let Some(ref mut rx) = broadcast_rx {
                        rx.recv().await
                    } else {
                        // Not in a room yet — wait forever
                        std::future::pending().await
                    }
                } => {
                    match msg {
                        Ok(data) => {
                            // Don't echo the connection's own frames back
                            if let Ok(frame) = RelayMessage::decode(&data) {
                                if frame.sender_id == conn_id {
                                    continue;
                                }
                            }
                            if ws_sender
                                .send(Message::Binary(data.to_vec().into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Connection {conn_id} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Cleanup: leave whatever room this connection occupied
        if let Some(left) = registry.leave_room(conn_id).await {
            let notice =
                RelayMessage::user_left(conn_id, &left.room_id, left.users_count as u64);
            let _ = left.broadcast.broadcast(&notice);
            log::info!(
                "Connection {conn_id} left room {} ({} users remain)",
                left.room_id,
                left.users_count
            );
        }

        stats.write().await.active_connections -= 1;

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.registry.room_count().await;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// The shared room registry (also serves the HTTP surface).
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}
