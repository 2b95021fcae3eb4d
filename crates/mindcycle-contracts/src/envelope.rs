// Event envelope and the closed event-name enumeration
//
// Every event that crosses the bus or the transport is an EventEnvelope.
// The payload is a tag/content union keyed by event_name, so a payload can
// never be paired with the wrong name. The server-side loop engine is the
// single writer of phase events; clients only mirror them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cycle::{LoopConfigSummary, Observation, Plan, PlannedAction, Reasoning};
use crate::error::ContractError;
use crate::metadata::MetadataMap;
use crate::phase::{ActionStatus, LoopStatus, Phase, PhaseSet};

/// Closed enumeration of event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "orpar.initialize")]
    Initialize,
    #[serde(rename = "orpar.started")]
    Started,
    #[serde(rename = "orpar.observation")]
    Observation,
    #[serde(rename = "orpar.reasoning")]
    Reasoning,
    #[serde(rename = "orpar.plan")]
    Plan,
    #[serde(rename = "orpar.action")]
    Action,
    #[serde(rename = "orpar.execution")]
    Execution,
    #[serde(rename = "orpar.reflection")]
    Reflection,
    #[serde(rename = "orpar.stopped")]
    Stopped,
    #[serde(rename = "orpar.phase_violation")]
    PhaseViolation,
    #[serde(rename = "agent.hint")]
    Hint,
}

impl EventName {
    /// Every event name, in a stable order
    pub const ALL: [EventName; 11] = [
        EventName::Initialize,
        EventName::Started,
        EventName::Observation,
        EventName::Reasoning,
        EventName::Plan,
        EventName::Action,
        EventName::Execution,
        EventName::Reflection,
        EventName::Stopped,
        EventName::PhaseViolation,
        EventName::Hint,
    ];

    /// Wire name (dotted, namespaced)
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Initialize => "orpar.initialize",
            EventName::Started => "orpar.started",
            EventName::Observation => "orpar.observation",
            EventName::Reasoning => "orpar.reasoning",
            EventName::Plan => "orpar.plan",
            EventName::Action => "orpar.action",
            EventName::Execution => "orpar.execution",
            EventName::Reflection => "orpar.reflection",
            EventName::Stopped => "orpar.stopped",
            EventName::PhaseViolation => "orpar.phase_violation",
            EventName::Hint => "agent.hint",
        }
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> Option<EventName> {
        EventName::ALL.into_iter().find(|n| n.as_str() == s)
    }

    /// The five canonical phase events a client mirror tracks
    pub fn is_phase_event(&self) -> bool {
        matches!(
            self,
            EventName::Observation
                | EventName::Reasoning
                | EventName::Plan
                | EventName::Action
                | EventName::Reflection
        )
    }

    /// Critical events are never dropped under backpressure
    pub fn is_critical(&self) -> bool {
        self.is_phase_event()
            || matches!(
                self,
                EventName::Initialize | EventName::Started | EventName::Stopped
            )
    }

    /// The loop phase a canonical phase event announces
    pub fn phase(&self) -> Option<Phase> {
        match self {
            EventName::Observation => Some(Phase::Observe),
            EventName::Reasoning => Some(Phase::Reason),
            EventName::Plan => Some(Phase::Plan),
            EventName::Action | EventName::Execution => Some(Phase::Act),
            EventName::Reflection => Some(Phase::Reflect),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed event payload, discriminated by event name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_name", content = "data")]
pub enum EventPayload {
    /// Loop created, not yet started
    #[serde(rename = "orpar.initialize")]
    Initialize {
        loop_id: Uuid,
        config: LoopConfigSummary,
        status: LoopStatus,
    },

    /// Loop started; first Observe phase entered
    #[serde(rename = "orpar.started")]
    Started { loop_id: Uuid, status: LoopStatus },

    /// Observation recorded into the loop buffer
    #[serde(rename = "orpar.observation")]
    Observation {
        loop_id: Uuid,
        observation: Observation,
    },

    /// Reasoning artifact produced
    #[serde(rename = "orpar.reasoning")]
    Reasoning { loop_id: Uuid, reasoning: Reasoning },

    /// Plan bound to the loop
    #[serde(rename = "orpar.plan")]
    Plan { loop_id: Uuid, plan: Plan },

    /// Per-action status update
    #[serde(rename = "orpar.action")]
    Action {
        loop_id: Uuid,
        action: PlannedAction,
        status: ActionStatus,
    },

    /// Action execution is starting
    #[serde(rename = "orpar.execution")]
    Execution {
        loop_id: Uuid,
        action: PlannedAction,
    },

    /// Reflection completed for the cycle; the reflection artifact rides
    /// in the context map under the recognized `reflection` key
    #[serde(rename = "orpar.reflection")]
    Reflection { loop_id: Uuid, context: MetadataMap },

    /// Loop is stopping; the reason rides in the context map
    #[serde(rename = "orpar.stopped")]
    Stopped {
        loop_id: Uuid,
        status: LoopStatus,
        context: MetadataMap,
    },

    /// A tool call was rejected by phase gating
    #[serde(rename = "orpar.phase_violation")]
    PhaseViolation {
        loop_id: Uuid,
        tool: String,
        phase: Phase,
        allowed: PhaseSet,
    },

    /// Free-form hint to agents, may carry orpar_phase metadata
    #[serde(rename = "agent.hint")]
    Hint {
        #[serde(skip_serializing_if = "Option::is_none")]
        loop_id: Option<Uuid>,
        hint: String,
        metadata: MetadataMap,
    },
}

impl EventPayload {
    /// The event name this payload is keyed by
    pub fn name(&self) -> EventName {
        match self {
            EventPayload::Initialize { .. } => EventName::Initialize,
            EventPayload::Started { .. } => EventName::Started,
            EventPayload::Observation { .. } => EventName::Observation,
            EventPayload::Reasoning { .. } => EventName::Reasoning,
            EventPayload::Plan { .. } => EventName::Plan,
            EventPayload::Action { .. } => EventName::Action,
            EventPayload::Execution { .. } => EventName::Execution,
            EventPayload::Reflection { .. } => EventName::Reflection,
            EventPayload::Stopped { .. } => EventName::Stopped,
            EventPayload::PhaseViolation { .. } => EventName::PhaseViolation,
            EventPayload::Hint { .. } => EventName::Hint,
        }
    }

    /// The loop this payload concerns, if any
    pub fn loop_id(&self) -> Option<Uuid> {
        match self {
            EventPayload::Initialize { loop_id, .. }
            | EventPayload::Started { loop_id, .. }
            | EventPayload::Observation { loop_id, .. }
            | EventPayload::Reasoning { loop_id, .. }
            | EventPayload::Plan { loop_id, .. }
            | EventPayload::Action { loop_id, .. }
            | EventPayload::Execution { loop_id, .. }
            | EventPayload::Reflection { loop_id, .. }
            | EventPayload::Stopped { loop_id, .. }
            | EventPayload::PhaseViolation { loop_id, .. } => Some(*loop_id),
            EventPayload::Hint { loop_id, .. } => *loop_id,
        }
    }
}

/// The envelope every event travels in
///
/// Wire shape: `{event_name, data, agent_id, channel_id, timestamp,
/// correlation_id?}`. The correlation id is the idempotency key for
/// at-least-once delivery; handlers suppress duplicates by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub agent_id: Uuid,
    pub channel_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl EventEnvelope {
    /// Create an envelope with a fresh correlation id
    pub fn new(agent_id: Uuid, channel_id: Uuid, payload: EventPayload) -> Self {
        Self {
            payload,
            agent_id,
            channel_id,
            timestamp: Utc::now(),
            correlation_id: Some(Uuid::now_v7()),
        }
    }

    /// Override the correlation id (used when re-delivering)
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Event name of the payload
    pub fn name(&self) -> EventName {
        self.payload.name()
    }

    /// Loop id of the payload, if any
    pub fn loop_id(&self) -> Option<Uuid> {
        self.payload.loop_id()
    }

    /// Serialize to a JSON value (cannot fail for our own types)
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode from a JSON value without schema validation
    ///
    /// Transport boundaries should prefer [`SchemaRegistry::decode`] which
    /// validates first.
    ///
    /// [`SchemaRegistry::decode`]: crate::schema::SchemaRegistry::decode
    pub fn from_value(value: serde_json::Value) -> Result<Self, ContractError> {
        serde_json::from_value(value).map_err(|e| ContractError::malformed(e.to_string()))
    }
}

/// Bounded window of seen correlation ids
///
/// The at-least-once delivery contract makes duplicate suppression the
/// handler's job; this is the standard implementation handlers share.
#[derive(Debug, Default)]
pub struct CorrelationWindow {
    seen: std::collections::HashSet<Uuid>,
    order: std::collections::VecDeque<Uuid>,
    capacity: usize,
}

impl CorrelationWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: std::collections::HashSet::new(),
            order: std::collections::VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record an envelope's correlation id
    ///
    /// Returns false when the id was already seen (a duplicate delivery).
    /// Envelopes without a correlation id are never treated as duplicates.
    pub fn observe(&mut self, envelope: &EventEnvelope) -> bool {
        let Some(id) = envelope.correlation_id else {
            return true;
        };
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> EventEnvelope {
        EventEnvelope::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            EventPayload::Started {
                loop_id: Uuid::now_v7(),
                status: LoopStatus::Starting,
            },
        )
    }

    #[test]
    fn test_event_name_roundtrip() {
        for name in EventName::ALL {
            assert_eq!(EventName::parse(name.as_str()), Some(name));
        }
        assert_eq!(EventName::parse("orpar.dance"), None);
    }

    #[test]
    fn test_wire_shape() {
        let envelope = sample_envelope();
        let value = envelope.to_value();

        assert_eq!(value["event_name"], "orpar.started");
        assert_eq!(value["data"]["status"], "starting");
        assert!(value["agent_id"].is_string());
        assert!(value["channel_id"].is_string());
        assert!(value["timestamp"].is_string());
        assert!(value["correlation_id"].is_string());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = sample_envelope();
        let value = envelope.to_value();
        let decoded = EventEnvelope::from_value(value).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_payload_name_matches_serde_tag() {
        let envelope = sample_envelope();
        let value = envelope.to_value();
        assert_eq!(value["event_name"], envelope.name().as_str());
    }

    #[test]
    fn test_phase_events() {
        assert!(EventName::Observation.is_phase_event());
        assert!(EventName::Reflection.is_phase_event());
        assert!(!EventName::Started.is_phase_event());
        assert!(!EventName::Hint.is_phase_event());
    }

    #[test]
    fn test_critical_events() {
        // Phase transitions and lifecycle events are never dropped
        assert!(EventName::Plan.is_critical());
        assert!(EventName::Stopped.is_critical());
        assert!(!EventName::Hint.is_critical());
        assert!(!EventName::PhaseViolation.is_critical());
    }

    #[test]
    fn test_event_phase_mapping() {
        assert_eq!(EventName::Observation.phase(), Some(Phase::Observe));
        assert_eq!(EventName::Execution.phase(), Some(Phase::Act));
        assert_eq!(EventName::Initialize.phase(), None);
    }

    #[test]
    fn test_correlation_window_dedupes() {
        let mut window = CorrelationWindow::new(8);
        let envelope = sample_envelope();

        assert!(window.observe(&envelope));
        assert!(!window.observe(&envelope));

        // A different correlation id is fresh
        let other = sample_envelope();
        assert!(window.observe(&other));
    }

    #[test]
    fn test_correlation_window_bounded() {
        let mut window = CorrelationWindow::new(2);
        let first = sample_envelope();
        assert!(window.observe(&first));
        assert!(window.observe(&sample_envelope()));
        assert!(window.observe(&sample_envelope()));
        assert_eq!(window.len(), 2);

        // The first id was evicted, so a redelivery now passes
        assert!(window.observe(&first));
    }

    #[test]
    fn test_no_correlation_id_never_duplicate() {
        let mut window = CorrelationWindow::new(2);
        let mut envelope = sample_envelope();
        envelope.correlation_id = None;
        assert!(window.observe(&envelope));
        assert!(window.observe(&envelope));
    }

    #[test]
    fn test_hint_without_loop_id() {
        let payload = EventPayload::Hint {
            loop_id: None,
            hint: "stay focused".into(),
            metadata: MetadataMap::new().with_orpar_phase(Phase::Plan),
        };
        assert_eq!(payload.loop_id(), None);

        let envelope = EventEnvelope::new(Uuid::now_v7(), Uuid::now_v7(), payload);
        let value = envelope.to_value();
        assert!(value["data"].get("loop_id").is_none());
        assert_eq!(value["data"]["metadata"]["orpar_phase"], "plan");
    }
}
