// Wire contracts for Mindcycle
//
// Everything that crosses a boundary lives here: the closed event-name
// enumeration, the typed payload union, the envelope that wraps it, the
// cycle artifacts (observations, reasoning, plans, reflections), and the
// schema registry that validates envelopes at emit and receive.
//
// This crate has no async runtime dependency; it is pure data.

pub mod agent;
pub mod cycle;
pub mod envelope;
pub mod error;
pub mod metadata;
pub mod phase;
pub mod schema;

pub use agent::{Agent, AgentStatus, LlmProfile};
pub use cycle::{
    LearningSignals, LoopConfigSummary, Observation, Plan, PlannedAction, Reasoning, Reflection,
    ReflectionMetrics, SOURCE_ACTION_RESULT, SOURCE_EXTERNAL,
};
pub use envelope::{CorrelationWindow, EventEnvelope, EventName, EventPayload};
pub use error::{ContractError, Result};
pub use metadata::{
    MetadataMap, KEY_LOOP_OWNER_ID, KEY_ORPAR_PHASE, KEY_REASON, KEY_REFLECTION,
};
pub use phase::{ActionStatus, LoopStatus, Phase, PhaseSet};
pub use schema::SchemaRegistry;
