// Wire frames for the WebSocket transport
//
// The first client frame must be a Handshake. After the ack, Event and
// Batch frames carry validated envelopes; Ping/Pong drive the heartbeat.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{Credential, RejectReason};

/// A transport frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    /// First client frame: authenticate and name the channel to join
    Handshake {
        auth: Credential,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<Uuid>,
        channel_id: Uuid,
    },
    /// Server accepts the handshake
    HandshakeAck { session_id: Uuid },
    /// Server rejects the handshake and closes
    HandshakeRejected { reason: RejectReason },
    /// One event envelope (raw JSON, validated by the receiver)
    Event { envelope: serde_json::Value },
    /// Coalesced envelopes from the outbound batching queue
    Batch { envelopes: Vec<serde_json::Value> },
    Ping { seq: u64 },
    Pong { seq: u64 },
}

impl Frame {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_text(text: &str) -> Option<Frame> {
        serde_json::from_str(text).ok()
    }
}
