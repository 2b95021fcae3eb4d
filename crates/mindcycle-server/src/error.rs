// Error types for the network bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur in the network bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Handshake authentication failed
    #[error("authentication rejected: {0}")]
    AuthRejected(crate::auth::RejectReason),

    /// Inbound payload failed re-validation
    #[error("invalid inbound payload: {0}")]
    InvalidPayload(#[from] mindcycle_contracts::ContractError),

    /// The socket closed before the operation completed
    #[error("connection closed")]
    ConnectionClosed,

    /// Outbound delivery gave up after bounded retries
    #[error("delivery failed after {attempts} attempts")]
    DeliveryFailed { attempts: u32 },

    /// Core engine rejected the request
    #[error(transparent)]
    Core(#[from] mindcycle_core::CoreError),

    /// Transport-level failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl BridgeError {
    pub fn transport(msg: impl Into<String>) -> Self {
        BridgeError::Transport(msg.into())
    }
}
