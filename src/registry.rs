//! Room registry and per-room document store.
//!
//! One service object owns every room: its occupancy (via the room's
//! `BroadcastGroup`), its authoritative CRDT document, its update throttle,
//! and its creation timestamp. Constructed once per process and shared by
//! `Arc` into the relay handlers and the HTTP surface — never ambient
//! module state.
//!
//! Rooms are created lazily on first join, first update, or first metadata
//! query. The in-memory document is purely ephemeral; what happens to it
//! when the last occupant leaves is an [`EvictionPolicy`] decision.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::broadcast::BroadcastGroup;
use crate::throttle::UpdateThrottle;

/// What happens to a room's document when occupancy reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Keep the document forever; a later join sees the full history.
    Retain,
    /// Drop the room (and its document) as soon as it empties.
    EvictWhenEmpty,
    /// Keep empty rooms for the given duration, then sweep them.
    IdleTtl(Duration),
}

/// Externally visible room metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: String,
    pub users_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of joining a room.
pub struct JoinOutcome {
    /// Full document snapshot to send to the joiner.
    pub snapshot: Vec<u8>,
    /// Occupancy including the joiner.
    pub users_count: usize,
    /// Receiver for frames relayed within the room.
    pub receiver: broadcast::Receiver<Arc<Vec<u8>>>,
    /// The room's broadcast group, for the arrival notification.
    pub broadcast: Arc<BroadcastGroup>,
    /// Outcome of the implicit leave when the connection switched rooms.
    pub previous: Option<LeaveOutcome>,
}

/// Result of leaving a room.
pub struct LeaveOutcome {
    pub room_id: String,
    /// Occupancy after the departure.
    pub users_count: usize,
    /// The room's broadcast group, for the departure notification.
    pub broadcast: Arc<BroadcastGroup>,
}

/// Result of an inbound update.
pub enum ApplyOutcome {
    /// Merged into the room document; relay the raw bytes via this group.
    Relayed(Arc<BroadcastGroup>),
    /// Inside the debounce window; dropped silently.
    Throttled,
    /// Malformed payload; logged and dropped, room state untouched.
    Rejected,
}

/// Per-room state: authoritative document plus bookkeeping.
struct RoomState {
    doc: Doc,
    created_at: DateTime<Utc>,
    broadcast: Arc<BroadcastGroup>,
    throttle: UpdateThrottle,
    /// Set when occupancy last hit zero, for TTL sweeps.
    empty_since: Option<Instant>,
}

impl RoomState {
    fn new(broadcast_capacity: usize, debounce: Duration) -> Self {
        Self {
            doc: Doc::new(),
            created_at: Utc::now(),
            broadcast: Arc::new(BroadcastGroup::new(broadcast_capacity)),
            throttle: UpdateThrottle::new(debounce),
            empty_since: None,
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }
}

/// Process-wide registry of rooms and their documents.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, RoomState>>,
    /// Which room each connection occupies (at most one).
    conn_rooms: RwLock<HashMap<Uuid, String>>,
    broadcast_capacity: usize,
    debounce: Duration,
    policy: EvictionPolicy,
}

impl RoomRegistry {
    /// Create a registry.
    pub fn new(broadcast_capacity: usize, debounce: Duration, policy: EvictionPolicy) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            conn_rooms: RwLock::new(HashMap::new()),
            broadcast_capacity,
            debounce,
            policy,
        }
    }

    /// Registry with default capacity, debounce, and retention.
    pub fn with_defaults() -> Self {
        Self::new(
            256,
            crate::throttle::DEFAULT_UPDATE_DEBOUNCE,
            EvictionPolicy::Retain,
        )
    }

    /// Join `conn_id` to a room, leaving any prior room first.
    ///
    /// Creates the room and an empty document lazily. Never fails: the
    /// returned snapshot may simply be empty.
    pub async fn join_room(&self, conn_id: Uuid, room_id: &str) -> JoinOutcome {
        // At-most-one-room invariant: the implicit leave happens before
        // the join so a connection is never counted twice.
        let previous = self.leave_room(conn_id).await;

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Created room {room_id}");
            RoomState::new(self.broadcast_capacity, self.debounce)
        });

        let receiver = room.broadcast.add_peer(conn_id).await;
        room.empty_since = None;
        let users_count = room.broadcast.peer_count().await;
        let snapshot = room.snapshot();
        let broadcast = room.broadcast.clone();
        drop(rooms);

        self.conn_rooms
            .write()
            .await
            .insert(conn_id, room_id.to_string());

        debug!("Connection {conn_id} joined room {room_id} ({users_count} occupants)");

        JoinOutcome {
            snapshot,
            users_count,
            receiver,
            broadcast,
            previous,
        }
    }

    /// Remove `conn_id` from whatever room it occupies.
    ///
    /// Returns `None` if the connection was not in a room. When the room
    /// empties, the eviction policy decides the document's fate.
    pub async fn leave_room(&self, conn_id: Uuid) -> Option<LeaveOutcome> {
        let room_id = self.conn_rooms.write().await.remove(&conn_id)?;

        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(&room_id)?;

        room.broadcast.remove_peer(&conn_id).await;
        room.throttle.forget(&conn_id);
        let users_count = room.broadcast.peer_count().await;
        let group = room.broadcast.clone();

        if users_count == 0 {
            match self.policy {
                EvictionPolicy::EvictWhenEmpty => {
                    rooms.remove(&room_id);
                    info!("Removed empty room {room_id}");
                }
                EvictionPolicy::Retain | EvictionPolicy::IdleTtl(_) => {
                    room.empty_since = Some(Instant::now());
                }
            }
        }

        debug!("Connection {conn_id} left room {room_id} ({users_count} occupants)");

        Some(LeaveOutcome {
            room_id,
            users_count,
            broadcast: group,
        })
    }

    /// Current occupancy of a room, 0 if unknown.
    ///
    /// Always derived from the live connection set, never cached.
    pub async fn occupancy(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(room_id) {
            Some(room) => room.broadcast.peer_count().await,
            None => 0,
        }
    }

    /// Full document snapshot, `None` when the room is unknown.
    ///
    /// A sync request against an unknown room is a silent no-op, not an
    /// error.
    pub async fn snapshot(&self, room_id: &str) -> Option<Vec<u8>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|room| room.snapshot())
    }

    /// Merge an inbound update into the room's document.
    ///
    /// Creates the room lazily if this is the first message referencing
    /// it. The debounce check runs first; throttled updates are never
    /// merged or relayed. Decode/merge failures are isolated: they are
    /// logged and dropped without corrupting the room or punishing the
    /// sender.
    pub async fn apply_update(&self, conn_id: Uuid, room_id: &str, update: &[u8]) -> ApplyOutcome {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomState::new(self.broadcast_capacity, self.debounce));

        if !room.throttle.allow(conn_id, Instant::now()) {
            debug!("Throttled update from {conn_id} in room {room_id}");
            return ApplyOutcome::Throttled;
        }

        let decoded = match Update::decode_v1(update) {
            Ok(u) => u,
            Err(e) => {
                warn!("Room {room_id}: dropping malformed update from {conn_id}: {e}");
                return ApplyOutcome::Rejected;
            }
        };

        {
            let mut txn = room.doc.transact_mut();
            if let Err(e) = txn.apply_update(decoded) {
                warn!("Room {room_id}: failed to merge update from {conn_id}: {e}");
                return ApplyOutcome::Rejected;
            }
        }

        ApplyOutcome::Relayed(room.broadcast.clone())
    }

    /// Replace a room's document with a brand-new empty one.
    ///
    /// A destructive, non-mergeable reset: all CRDT history is discarded,
    /// so cleared strokes cannot resurface via later merges. Peers learn
    /// about it through an explicit clear signal, never a document update.
    pub async fn clear_room(&self, room_id: &str) -> Option<Arc<BroadcastGroup>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id)?;
        room.doc = Doc::new();
        info!("Cleared room {room_id}");
        Some(room.broadcast.clone())
    }

    /// Room metadata for the HTTP surface, creating the room if absent.
    pub async fn room_info(&self, room_id: &str) -> RoomInfo {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Created room {room_id}");
            RoomState::new(self.broadcast_capacity, self.debounce)
        });

        RoomInfo {
            room_id: room_id.to_string(),
            users_count: room.broadcast.peer_count().await as u64,
            created_at: room.created_at,
        }
    }

    /// Drop rooms that have been empty longer than the configured TTL.
    ///
    /// Only meaningful under [`EvictionPolicy::IdleTtl`]; returns the
    /// number of rooms removed.
    pub async fn sweep_idle(&self) -> usize {
        let ttl = match self.policy {
            EvictionPolicy::IdleTtl(ttl) => ttl,
            _ => return 0,
        };

        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|room_id, room| {
            let expired = matches!(room.empty_since, Some(at) if at.elapsed() >= ttl);
            if expired {
                info!("Swept idle room {room_id}");
            }
            !expired
        });
        before - rooms.len()
    }

    /// Occupancy of every tracked room, for the heartbeat broadcaster.
    ///
    /// Returns `(room_id, users_count, broadcast)` triples so the caller
    /// can fan out without holding the registry lock.
    pub async fn room_occupancies(&self) -> Vec<(String, usize, Arc<BroadcastGroup>)> {
        let rooms = self.rooms.read().await;
        let mut out = Vec::with_capacity(rooms.len());
        for (room_id, room) in rooms.iter() {
            let count = room.broadcast.peer_count().await;
            out.push((room_id.clone(), count, room.broadcast.clone()));
        }
        out
    }

    /// Number of rooms currently tracked (occupied or retained).
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Number of connections currently in a room.
    pub async fn connection_count(&self) -> usize {
        self.conn_rooms.read().await.len()
    }

    /// The configured eviction policy.
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }
}
