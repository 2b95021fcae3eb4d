// Error types for contract validation

use thiserror::Error;

/// Result type alias for contract operations
pub type Result<T> = std::result::Result<T, ContractError>;

/// Errors produced while validating or decoding wire payloads
#[derive(Debug, Clone, Error)]
pub enum ContractError {
    /// Payload failed structural validation against the registered schema
    #[error("schema violation for '{event}': {detail}")]
    SchemaViolation { event: String, detail: String },

    /// Event name is not part of the closed enumeration
    #[error("unknown event name: {0}")]
    UnknownEvent(String),

    /// Envelope could not be decoded at all
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

impl ContractError {
    /// Create a schema violation error
    pub fn schema(event: impl Into<String>, detail: impl Into<String>) -> Self {
        ContractError::SchemaViolation {
            event: event.into(),
            detail: detail.into(),
        }
    }

    /// Create a malformed envelope error
    pub fn malformed(detail: impl Into<String>) -> Self {
        ContractError::Malformed(detail.into())
    }
}
