// Mindcycle network bridge
//
// Maps the in-process event bus onto a room-scoped WebSocket transport:
// authenticated sockets join their channel's room, server events fan out
// through a per-socket batching queue, and inbound payloads are
// re-validated before they reach the engine. At-least-once inside a
// room; duplicate suppression is by correlation id.

pub mod agents;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod outbound;
pub mod protocol;
pub mod rooms;
pub mod ws;

pub use agents::AgentDirectory;
pub use auth::{AuthStore, Credential, Principal, RejectReason};
pub use bridge::NetworkBridge;
pub use config::{BridgeConfig, OutboundConfig};
pub use error::{BridgeError, Result};
pub use protocol::Frame;
pub use rooms::RoomRegistry;
pub use ws::{router, TransportState};
