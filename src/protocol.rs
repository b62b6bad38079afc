//! Binary wire protocol for the canvas relay.
//!
//! Every frame is a `(tag, payload)` pair (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┐
//! │ msg_type │ sender_id │ room_id  │ payload  │
//! │ 1 byte   │ 16 bytes  │ variable │ variable │
//! └──────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! `sender_id` is the logical originator of the frame so receivers can
//! filter self-originated echoes; the server stamps relayed frames with the
//! transport-assigned connection id and never trusts a client-claimed one.
//! `room_id` is an opaque room key.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message tags for the relay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Join (or switch to) a room
    JoinRoom = 1,
    /// Request a full document snapshot
    Sync = 2,
    /// Incremental CRDT diff
    Update = 3,
    /// Destructive canvas reset
    ClearCanvas = 4,
    /// Full document snapshot (server → joiner/requester only)
    SyncState = 5,
    /// A peer joined the room
    UserJoined = 6,
    /// A peer left the room
    UserLeft = 7,
    /// Occupancy heartbeat
    UserCount = 8,
}

/// Occupancy change payload for `UserJoined` / `UserLeft`.
///
/// `users_count` is derived from the room's connection set at broadcast
/// time, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyUpdate {
    pub user_id: Uuid,
    pub users_count: u64,
}

/// Top-level protocol frame.
///
/// Serialized with bincode for minimal overhead. Update payloads carry the
/// raw CRDT diff bytes untouched; the relay never re-encodes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    pub msg_type: MessageType,
    pub sender_id: Uuid,
    pub room_id: String,
    /// Frame payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl RelayMessage {
    /// Create a join-room request.
    pub fn join_room(sender_id: Uuid, room_id: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::JoinRoom,
            sender_id,
            room_id: room_id.into(),
            payload: Vec::new(),
        }
    }

    /// Create a snapshot request.
    pub fn sync(sender_id: Uuid, room_id: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Sync,
            sender_id,
            room_id: room_id.into(),
            payload: Vec::new(),
        }
    }

    /// Create an incremental update carrying CRDT diff bytes.
    pub fn update(sender_id: Uuid, room_id: impl Into<String>, diff: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Update,
            sender_id,
            room_id: room_id.into(),
            payload: diff,
        }
    }

    /// Create a clear-canvas signal.
    ///
    /// Carries no payload: the reset is communicated as a signal, never as
    /// a mergeable document update.
    pub fn clear_canvas(sender_id: Uuid, room_id: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::ClearCanvas,
            sender_id,
            room_id: room_id.into(),
            payload: Vec::new(),
        }
    }

    /// Create a full-snapshot frame (server-originated).
    pub fn sync_state(room_id: impl Into<String>, snapshot: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncState,
            sender_id: Uuid::nil(),
            room_id: room_id.into(),
            payload: snapshot,
        }
    }

    /// Create a user-joined notification.
    pub fn user_joined(user_id: Uuid, room_id: impl Into<String>, users_count: u64) -> Self {
        let occupancy = OccupancyUpdate {
            user_id,
            users_count,
        };
        let payload = bincode::serde::encode_to_vec(occupancy, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::UserJoined,
            sender_id: user_id,
            room_id: room_id.into(),
            payload,
        }
    }

    /// Create a user-left notification.
    pub fn user_left(user_id: Uuid, room_id: impl Into<String>, users_count: u64) -> Self {
        let occupancy = OccupancyUpdate {
            user_id,
            users_count,
        };
        let payload = bincode::serde::encode_to_vec(occupancy, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::UserLeft,
            sender_id: user_id,
            room_id: room_id.into(),
            payload,
        }
    }

    /// Create an occupancy heartbeat (server-originated).
    pub fn user_count(room_id: impl Into<String>, users_count: u64) -> Self {
        let payload = bincode::serde::encode_to_vec(users_count, bincode::config::standard())
            .unwrap_or_default();
        Self {
            msg_type: MessageType::UserCount,
            sender_id: Uuid::nil(),
            room_id: room_id.into(),
            payload,
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the occupancy payload of a `UserJoined` / `UserLeft` frame.
    pub fn occupancy(&self) -> Result<OccupancyUpdate, ProtocolError> {
        if self.msg_type != MessageType::UserJoined && self.msg_type != MessageType::UserLeft {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (occupancy, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(occupancy)
    }

    /// Parse the count payload of a `UserCount` frame.
    pub fn users_count(&self) -> Result<u64, ProtocolError> {
        if self.msg_type != MessageType::UserCount {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (count, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(count)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_roundtrip() {
        let sender = Uuid::new_v4();
        let diff = vec![1, 2, 3, 4, 5];

        let msg = RelayMessage::update(sender, "r1", diff.clone());
        let encoded = msg.encode().unwrap();
        let decoded = RelayMessage::decode(&encoded).unwrap();

        assert_eq!(decoded.msg_type, MessageType::Update);
        assert_eq!(decoded.sender_id, sender);
        assert_eq!(decoded.room_id, "r1");
        assert_eq!(decoded.payload, diff);
    }

    #[test]
    fn test_join_room_roundtrip() {
        let sender = Uuid::new_v4();

        let msg = RelayMessage::join_room(sender, "lobby");
        let encoded = msg.encode().unwrap();
        let decoded = RelayMessage::decode(&encoded).unwrap();

        assert_eq!(decoded.msg_type, MessageType::JoinRoom);
        assert_eq!(decoded.room_id, "lobby");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_sync_state_roundtrip() {
        let snapshot = vec![100, 200];

        let msg = RelayMessage::sync_state("r1", snapshot.clone());
        let encoded = msg.encode().unwrap();
        let decoded = RelayMessage::decode(&encoded).unwrap();

        assert_eq!(decoded.msg_type, MessageType::SyncState);
        assert_eq!(decoded.sender_id, Uuid::nil());
        assert_eq!(decoded.payload, snapshot);
    }

    #[test]
    fn test_user_joined_roundtrip() {
        let user = Uuid::new_v4();

        let msg = RelayMessage::user_joined(user, "r1", 3);
        let encoded = msg.encode().unwrap();
        let decoded = RelayMessage::decode(&encoded).unwrap();

        assert_eq!(decoded.msg_type, MessageType::UserJoined);
        let occupancy = decoded.occupancy().unwrap();
        assert_eq!(occupancy.user_id, user);
        assert_eq!(occupancy.users_count, 3);
    }

    #[test]
    fn test_user_left_roundtrip() {
        let user = Uuid::new_v4();

        let msg = RelayMessage::user_left(user, "r1", 0);
        let encoded = msg.encode().unwrap();
        let decoded = RelayMessage::decode(&encoded).unwrap();

        assert_eq!(decoded.msg_type, MessageType::UserLeft);
        let occupancy = decoded.occupancy().unwrap();
        assert_eq!(occupancy.users_count, 0);
    }

    #[test]
    fn test_user_count_roundtrip() {
        let msg = RelayMessage::user_count("r1", 7);
        let encoded = msg.encode().unwrap();
        let decoded = RelayMessage::decode(&encoded).unwrap();

        assert_eq!(decoded.msg_type, MessageType::UserCount);
        assert_eq!(decoded.users_count().unwrap(), 7);
    }

    #[test]
    fn test_clear_canvas_has_no_payload() {
        let msg = RelayMessage::clear_canvas(Uuid::new_v4(), "r1");
        let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::ClearCanvas);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_invalid_payload_accessor() {
        let msg = RelayMessage::sync(Uuid::new_v4(), "r1");
        assert!(msg.occupancy().is_err());
        assert!(msg.users_count().is_err());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(RelayMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::JoinRoom as u8, 1);
        assert_eq!(MessageType::Sync as u8, 2);
        assert_eq!(MessageType::Update as u8, 3);
        assert_eq!(MessageType::ClearCanvas as u8, 4);
        assert_eq!(MessageType::SyncState as u8, 5);
        assert_eq!(MessageType::UserJoined as u8, 6);
        assert_eq!(MessageType::UserLeft as u8, 7);
        assert_eq!(MessageType::UserCount as u8, 8);
    }

    #[test]
    fn test_empty_update() {
        let msg = RelayMessage::update(Uuid::new_v4(), "r1", Vec::new());
        let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_large_update() {
        // Simulate a large snapshot-sized diff: 64KB
        let diff = vec![42u8; 65536];

        let msg = RelayMessage::update(Uuid::new_v4(), "r1", diff.clone());
        let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.payload.len(), 65536);
        assert_eq!(decoded.payload, diff);
    }

    #[test]
    fn test_update_size_efficient() {
        // Typical small yrs diff: ~50 bytes
        let msg = RelayMessage::update(Uuid::new_v4(), "room-1", vec![0u8; 50]);
        let encoded = msg.encode().unwrap();

        // 1 type byte + 16 sender bytes + room key + length prefixes + payload
        assert!(
            encoded.len() < 150,
            "Encoded size {} too large for 50-byte diff",
            encoded.len()
        );
    }
}
