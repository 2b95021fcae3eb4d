// Error taxonomy for the coordination core
//
// Kinds map to the propagation policy: recover locally where a degraded
// path exists (LLM fallback, retrieval degradation, correction), surface
// to the loop engine when an action cannot proceed, and only Fatal halts
// a loop.

use thiserror::Error;
use uuid::Uuid;

use mindcycle_contracts::{ContractError, Phase, PhaseSet};
use mindcycle_memory::MemoryError;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the coordination core
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload failed structural validation
    #[error("schema violation: {0}")]
    Schema(#[from] ContractError),

    /// Tool call attempted outside its allowed phases
    #[error("phase violation: tool '{tool}' not allowed in {phase} (allowed: {allowed:?})")]
    PhaseViolation {
        tool: String,
        phase: Phase,
        allowed: PhaseSet,
    },

    /// Tool circuit is open for this channel
    #[error("circuit open for tool '{tool}', retry after {retry_after_ms}ms")]
    CircuitOpen { tool: String, retry_after_ms: u64 },

    /// Validation failures exceeded the correction retry budget
    #[error("correction exhausted for tool '{tool}' after {attempts} attempts: {last_error}")]
    CorrectionExhausted {
        tool: String,
        attempts: u32,
        last_error: String,
    },

    /// Tool execution failed
    #[error("tool failure: {0}")]
    ToolFailure(String),

    /// Tool not registered (or not visible to this channel)
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// A register call conflicted with an existing descriptor
    #[error("tool conflict: {0}")]
    ToolConflict(String),

    /// LLM provider call failed or produced unparseable output after retry
    #[error("llm failure: {0}")]
    Llm(String),

    /// Cooperative cancellation; never fatal
    #[error("cancelled")]
    Cancelled,

    /// Memory/search backend is down; callers degrade
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Memory system error other than backend availability
    #[error("memory error: {0}")]
    Memory(MemoryError),

    /// Loop does not exist
    #[error("loop not found: {0}")]
    LoopNotFound(Uuid),

    /// An agent may own only one active loop at a time
    #[error("agent {agent_id} already owns active loop {loop_id}")]
    AgentBusy { agent_id: Uuid, loop_id: Uuid },

    /// Invariant violation; transitions the loop to Stopped
    #[error("fatal: {0}")]
    Fatal(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Create a tool failure error
    pub fn tool(msg: impl Into<String>) -> Self {
        CoreError::ToolFailure(msg.into())
    }

    /// Create an LLM failure error
    pub fn llm(msg: impl Into<String>) -> Self {
        CoreError::Llm(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        CoreError::Fatal(msg.into())
    }

    /// Create a tool conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::ToolConflict(msg.into())
    }

    /// Whether this error halts the loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Fatal(_))
    }

    /// Whether this error is cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

impl From<MemoryError> for CoreError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::BackendUnavailable(msg) => CoreError::BackendUnavailable(msg),
            other => CoreError::Memory(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CoreError::fatal("invariant broken").is_fatal());
        assert!(!CoreError::Cancelled.is_fatal());
        assert!(!CoreError::tool("boom").is_fatal());
    }

    #[test]
    fn test_backend_unavailable_mapping() {
        let err: CoreError = MemoryError::backend("search down").into();
        assert!(matches!(err, CoreError::BackendUnavailable(_)));

        let err: CoreError = MemoryError::NotFound(Uuid::nil()).into();
        assert!(matches!(err, CoreError::Memory(_)));
    }
}
