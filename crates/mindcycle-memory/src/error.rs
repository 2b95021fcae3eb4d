// Error types for the memory system

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors that can occur in the memory system
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The similarity/search backend is unreachable
    ///
    /// Callers degrade retrieval instead of failing the loop.
    #[error("memory backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Memory item does not exist
    #[error("memory item not found: {0}")]
    NotFound(Uuid),

    /// A read crossed a channel boundary it is not allowed to cross
    #[error("cross-channel read denied: {0}")]
    ScopeDenied(String),

    /// Store-level failure
    #[error("memory store error: {0}")]
    Store(String),
}

impl MemoryError {
    /// Create a backend unavailable error
    pub fn backend(msg: impl Into<String>) -> Self {
        MemoryError::BackendUnavailable(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        MemoryError::Store(msg.into())
    }

    /// Create a scope denial error
    pub fn scope_denied(msg: impl Into<String>) -> Self {
        MemoryError::ScopeDenied(msg.into())
    }
}
