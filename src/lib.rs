//! # canvas-sync — Real-time collaborative canvas relay
//!
//! Provides WebSocket-based multiplayer drawing using CRDT synchronization.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌───────────────┐
//! │ SessionClient │ ◄─────────────────► │ RelayServer   │
//! │ (per user)    │     Binary Proto    │ (central)     │
//! └──────┬────────┘                     └──────┬────────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌───────────────┐                     ┌───────────────┐
//! │ CanvasDoc     │                     │ RoomRegistry  │
//! │ (replica)     │                     │ room → Doc    │
//! └───────────────┘                     └──────┬────────┘
//!                                              │
//!                                      ┌───────┴───────┐
//!                                      │ BroadcastGroup│
//!                                      │ (fan-out)     │
//!                                      └───────────────┘
//! ```
//!
//! The relay holds the authoritative document per room so late joiners get
//! the full canvas in one snapshot. Occupancy, a per-connection update
//! debounce, and a destructive clear are handled server-side; a companion
//! HTTP endpoint exposes room metadata.
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded RelayMessage)
//! - [`canvas`] — Stroke-map CRDT document built on Yrs
//! - [`broadcast`] — Room-based fan-out with backpressure
//! - [`throttle`] — Per-connection update debounce
//! - [`registry`] — Room lifecycle, occupancy, and eviction policy
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket session client with a local replica
//! - [`http`] — Companion HTTP surface for room metadata
//! - [`config`] — Environment-driven configuration

pub mod broadcast;
pub mod canvas;
pub mod client;
pub mod config;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod throttle;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use canvas::{CanvasDoc, CanvasError, Stroke};
pub use client::{SessionClient, SessionError, SessionEvent, SessionState};
pub use config::{Config, ConfigError};
pub use protocol::{MessageType, OccupancyUpdate, ProtocolError, RelayMessage};
pub use registry::{
    ApplyOutcome, EvictionPolicy, JoinOutcome, LeaveOutcome, RoomInfo, RoomRegistry,
};
pub use server::{RelayServer, ServerConfig, ServerStats, DEFAULT_HEARTBEAT_INTERVAL};
pub use throttle::{UpdateThrottle, DEFAULT_UPDATE_DEBOUNCE};
