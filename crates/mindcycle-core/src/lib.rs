// Mindcycle coordination core
//
// The engine that drives every agent through the Observe -> Reason ->
// Plan -> Act -> Reflect cycle, routes validated phase events over the
// in-process bus, gates tool execution by phase and circuit state, and
// feeds reflection rewards back into utility-weighted memory.
//
// Collaborators behind traits: LLM completion (llm::CompletionClient),
// memory persistence and similarity search (mindcycle-memory), external
// tool servers (tools::ToolServerHandle). The network bridge and client
// mirror live in their own crates.

pub mod assembly;
pub mod bus;
pub mod engine;
pub mod error;
pub mod llm;
pub mod tools;

pub use assembly::{assemble, CoreConfig, CoreHandles};
pub use bus::{BusConfig, BusMetrics, EventBus, Subscription};
pub use engine::{EngineDeps, EngineState, LoopManager, LoopSnapshot};
pub use engine::manager::EngineConfig;
pub use error::{CoreError, Result};
pub use llm::{
    CompletionClient, CompletionRequest, MockCompletionClient, PhaseClient, PhaseClientConfig,
};
pub use tools::{
    BuiltinToolExecutor, CircuitBreakerConfig, CircuitState, GatedToolRunner, PatternStore,
    RiskLevel, ToolDescriptor, ToolRegistry, ToolServerConfig, ToolServerHandle,
    ToolServerSupervisor, ToolSource, ToolValidator,
};
