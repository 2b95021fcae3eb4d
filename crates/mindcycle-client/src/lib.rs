// Mindcycle agent-side client
//
// The mirror consumes the server's phase events for its active loop and
// keeps a local view of the current ORPAR phase, which feeds prompt
// template substitution. It never writes server state; client requests
// (like submitting an observation) are sent as envelopes for the server
// engine to process.

pub mod guidance;
pub mod mirror;
pub mod templates;

pub use guidance::phase_guidance;
pub use mirror::{MirrorConfig, PhaseMirror};
pub use templates::{render, NOT_IN_CYCLE, TEMPLATE_PHASE, TEMPLATE_PHASE_GUIDANCE};

use mindcycle_contracts::{EventEnvelope, EventPayload, Observation};
use uuid::Uuid;

/// Build the envelope a client sends to submit an observation
///
/// The server engine is the authority; this is a request, not a state
/// change.
pub fn observation_envelope(
    agent_id: Uuid,
    channel_id: Uuid,
    loop_id: Uuid,
    content: serde_json::Value,
) -> EventEnvelope {
    EventEnvelope::new(
        agent_id,
        channel_id,
        EventPayload::Observation {
            loop_id,
            observation: Observation::external(agent_id, content),
        },
    )
}
