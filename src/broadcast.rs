//! Fan-out broadcast to the other occupants of a room.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each
//! connection gets an independent receiver that buffers up to `capacity`
//! frames; lagging receivers drop the oldest frames rather than stalling
//! the room.
//!
//! The peer set doubles as the room's occupancy record: user counts are
//! always derived from it at query time, never cached.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::RelayMessage;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// A broadcast group for a single room.
///
/// All occupants share one channel. When a peer sends an update it is
/// fanned out to every subscriber; the N-1 exclusion of the sender happens
/// at the receiving end by `sender_id` comparison, so the channel itself
/// stays sender-agnostic.
pub struct BroadcastGroup {
    /// Broadcast channel sender (one per room)
    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Connection ids currently occupying this room
    peers: Arc<RwLock<HashSet<Uuid>>>,

    /// Channel capacity (frames buffered per receiver)
    capacity: usize,

    /// Lock-free send counter
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    /// Create a new broadcast group with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: Arc::new(RwLock::new(HashSet::new())),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Add a connection to this room's occupancy.
    ///
    /// Returns the receiver this connection consumes relayed frames from.
    pub async fn add_peer(&self, conn_id: Uuid) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut peers = self.peers.write().await;
        peers.insert(conn_id);
        self.sender.subscribe()
    }

    /// Remove a connection from this room's occupancy.
    ///
    /// Returns whether the connection was present.
    pub async fn remove_peer(&self, conn_id: &Uuid) -> bool {
        let mut peers = self.peers.write().await;
        peers.remove(conn_id)
    }

    /// Broadcast a frame to every subscriber.
    ///
    /// Returns the number of receivers the frame reached.
    pub fn broadcast(&self, msg: &RelayMessage) -> Result<usize, crate::protocol::ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes directly (zero-copy fast path).
    ///
    /// Update relays use this so the diff bytes are encoded exactly once
    /// regardless of room size.
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Current occupancy count.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Check if a connection occupies this room.
    pub async fn has_peer(&self, conn_id: &Uuid) -> bool {
        self.peers.read().await.contains(conn_id)
    }

    /// All occupying connection ids.
    pub async fn peers(&self) -> Vec<Uuid> {
        self.peers.read().await.iter().copied().collect()
    }

    /// Get broadcast statistics.
    pub async fn stats(&self) -> BroadcastStats {
        let peers = self.peers.read().await;
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: peers.len(),
        }
    }

    /// Get the channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe without joining the occupancy set (monitoring).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_remove_peer() {
        let group = BroadcastGroup::new(16);
        let conn = Uuid::new_v4();

        let _rx = group.add_peer(conn).await;
        assert_eq!(group.peer_count().await, 1);
        assert!(group.has_peer(&conn).await);

        assert!(group.remove_peer(&conn).await);
        assert_eq!(group.peer_count().await, 0);
        assert!(!group.has_peer(&conn).await);

        // Second removal is a no-op
        assert!(!group.remove_peer(&conn).await);
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let group = BroadcastGroup::new(16);

        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let c3 = Uuid::new_v4();

        let mut rx1 = group.add_peer(c1).await;
        let mut rx2 = group.add_peer(c2).await;
        let mut rx3 = group.add_peer(c3).await;

        let msg = RelayMessage::update(c1, "r1", vec![1, 2, 3]);
        let count = group.broadcast(&msg).unwrap();

        // All 3 receivers get it (sender filtering is the receiver's job)
        assert_eq!(count, 3);

        let _ = rx1.recv().await.unwrap();
        let _ = rx2.recv().await.unwrap();
        let _ = rx3.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_raw_zero_copy() {
        let group = BroadcastGroup::new(16);

        let mut rx = group.add_peer(Uuid::new_v4()).await;

        let data = Arc::new(vec![10, 20, 30]);
        let count = group.broadcast_raw(data.clone());
        assert_eq!(count, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(*received, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_broadcast_stats() {
        let group = BroadcastGroup::new(16);
        let conn = Uuid::new_v4();
        let _rx = group.add_peer(conn).await;

        let msg = RelayMessage::user_count("r1", 1);
        group.broadcast(&msg).unwrap();
        group.broadcast(&msg).unwrap();

        let stats = group.stats().await;
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.active_peers, 1);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let group = BroadcastGroup::new(16);
        let msg = RelayMessage::user_count("r1", 0);
        // No receivers — send reaches nobody but does not error
        assert_eq!(group.broadcast(&msg).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_peers_list() {
        let group = BroadcastGroup::new(16);

        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let _rx1 = group.add_peer(c1).await;
        let _rx2 = group.add_peer(c2).await;

        let peers = group.peers().await;
        assert_eq!(peers.len(), 2);
        assert!(peers.contains(&c1));
        assert!(peers.contains(&c2));
    }

    #[tokio::test]
    async fn test_capacity() {
        let group = BroadcastGroup::new(32);
        assert_eq!(group.capacity(), 32);
    }
}
