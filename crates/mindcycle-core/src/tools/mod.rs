// Hybrid tool registry and the gated execution path
//
// Internal tools are registered statically at startup; external tool
// servers register descriptors per-channel or globally at runtime.
// Execution passes through phase gating, the circuit breaker, and the
// validation/correction pipeline before anything runs.

pub mod builtin;
pub mod circuit;
pub mod correction;
pub mod descriptor;
pub mod external;
pub mod patterns;
pub mod registry;
pub mod runner;
pub mod validation;

pub use builtin::BuiltinToolExecutor;
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use correction::{CorrectionConfig, CorrectionEngine, CorrectionOutcome, CorrectionStrategy};
pub use descriptor::{RiskLevel, ToolDescriptor, ToolSource};
pub use external::{ToolServerConfig, ToolServerHandle, ToolServerSupervisor};
pub use patterns::{PatternStats, PatternStore};
pub use registry::ToolRegistry;
pub use runner::{GatedToolRunner, ToolExecutor};
pub use validation::{
    RiskAssessment, RiskCategory, SemanticRule, ToolValidator, ValidationFailure, ValidationLevel,
};
