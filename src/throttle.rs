//! Per-connection update debounce for a single room.
//!
//! Rapid pointer-move events can produce an update per mouse event; the
//! relay accepts at most one update per connection per debounce window
//! (default 30 ms) and silently drops the rest. Nothing is lost: the
//! sender's local document already holds the edit, and the next accepted
//! diff carries everything changed since the last export.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default debounce window between accepted updates from one connection.
pub const DEFAULT_UPDATE_DEBOUNCE: Duration = Duration::from_millis(30);

/// Tracks the last accepted update per connection in one room.
///
/// Callers pass `now` explicitly so decisions are reproducible in tests.
#[derive(Debug)]
pub struct UpdateThrottle {
    window: Duration,
    last_accepted: HashMap<Uuid, Instant>,
}

impl UpdateThrottle {
    /// Create a throttle with the given debounce window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    /// Decide whether to accept an update from `conn_id` at `now`.
    ///
    /// Accepts when no prior update was accepted, or when the window has
    /// elapsed since the last *accepted* one. Rejected updates do not
    /// extend the window.
    pub fn allow(&mut self, conn_id: Uuid, now: Instant) -> bool {
        match self.last_accepted.get(&conn_id) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                self.last_accepted.insert(conn_id, now);
                true
            }
        }
    }

    /// Drop tracking state for a connection that left the room.
    pub fn forget(&mut self, conn_id: &Uuid) {
        self.last_accepted.remove(conn_id);
    }

    /// Number of connections with tracked state.
    pub fn tracked(&self) -> usize {
        self.last_accepted.len()
    }

    /// The configured debounce window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for UpdateThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_accepted() {
        let mut throttle = UpdateThrottle::default();
        assert!(throttle.allow(Uuid::new_v4(), Instant::now()));
    }

    #[test]
    fn test_debounce_window() {
        let mut throttle = UpdateThrottle::new(Duration::from_millis(30));
        let conn = Uuid::new_v4();
        let t0 = Instant::now();

        // Accepted at t=0, rejected at t=10ms, accepted again at t=40ms
        assert!(throttle.allow(conn, t0));
        assert!(!throttle.allow(conn, t0 + Duration::from_millis(10)));
        assert!(throttle.allow(conn, t0 + Duration::from_millis(40)));
    }

    #[test]
    fn test_rejection_does_not_extend_window() {
        let mut throttle = UpdateThrottle::new(Duration::from_millis(30));
        let conn = Uuid::new_v4();
        let t0 = Instant::now();

        assert!(throttle.allow(conn, t0));
        // Rejections at 10ms and 20ms must not push the window forward:
        // 35ms is measured from t0, the last accepted update.
        assert!(!throttle.allow(conn, t0 + Duration::from_millis(10)));
        assert!(!throttle.allow(conn, t0 + Duration::from_millis(20)));
        assert!(throttle.allow(conn, t0 + Duration::from_millis(35)));
    }

    #[test]
    fn test_connections_independent() {
        let mut throttle = UpdateThrottle::new(Duration::from_millis(30));
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let t0 = Instant::now();

        assert!(throttle.allow(c1, t0));
        // A different connection is not throttled by c1's window
        assert!(throttle.allow(c2, t0 + Duration::from_millis(5)));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let mut throttle = UpdateThrottle::new(Duration::from_millis(30));
        let conn = Uuid::new_v4();
        let t0 = Instant::now();

        assert!(throttle.allow(conn, t0));
        // Exactly the window apart counts as elapsed
        assert!(throttle.allow(conn, t0 + Duration::from_millis(30)));
    }

    #[test]
    fn test_forget() {
        let mut throttle = UpdateThrottle::new(Duration::from_millis(30));
        let conn = Uuid::new_v4();
        let t0 = Instant::now();

        assert!(throttle.allow(conn, t0));
        assert_eq!(throttle.tracked(), 1);

        throttle.forget(&conn);
        assert_eq!(throttle.tracked(), 0);

        // After cleanup the connection starts fresh
        assert!(throttle.allow(conn, t0 + Duration::from_millis(1)));
    }
}
