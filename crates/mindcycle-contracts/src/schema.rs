// Table-driven schema registry for event envelopes
//
// One compiled JSON schema per event name, applied at emit and at receive.
// Structural validation catches shape mismatches; a small semantic pass
// afterwards enforces the numeric bounds a JSON schema alone states poorly
// (reward in [-1, 1], confidence in [0, 1]).

use std::collections::HashMap;

use jsonschema::JSONSchema;
use serde_json::{json, Value};

use crate::envelope::{EventEnvelope, EventName, EventPayload};
use crate::error::ContractError;

/// Registry of per-event envelope schemas
pub struct SchemaRegistry {
    validators: HashMap<EventName, JSONSchema>,
}

impl SchemaRegistry {
    /// Build the registry with the built-in schema table
    ///
    /// Compilation of the built-in schemas cannot fail; a failure here is a
    /// programming error and panics at startup rather than at emit time.
    pub fn with_defaults() -> Self {
        let mut validators = HashMap::new();
        for name in EventName::ALL {
            let schema = envelope_schema(name);
            let compiled = JSONSchema::compile(&schema)
                .unwrap_or_else(|e| panic!("built-in schema for {name} is invalid: {e}"));
            validators.insert(name, compiled);
        }
        Self { validators }
    }

    /// Structurally validate a raw envelope value, returning its event name
    pub fn validate(&self, value: &Value) -> Result<EventName, ContractError> {
        let name_str = value
            .get("event_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ContractError::malformed("missing event_name"))?;

        let name = EventName::parse(name_str)
            .ok_or_else(|| ContractError::UnknownEvent(name_str.to_string()))?;

        let validator = self
            .validators
            .get(&name)
            .ok_or_else(|| ContractError::UnknownEvent(name_str.to_string()))?;

        if let Err(errors) = validator.validate(value) {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ContractError::schema(name.as_str(), detail));
        }

        Ok(name)
    }

    /// Emit-side check: structural validation plus semantic bounds
    pub fn check(&self, envelope: &EventEnvelope) -> Result<(), ContractError> {
        let value = envelope.to_value();
        self.validate(&value)?;
        check_semantics(envelope)
    }

    /// Receive-side decode: validate the raw value, then deserialize
    pub fn decode(&self, value: Value) -> Result<EventEnvelope, ContractError> {
        self.validate(&value)?;
        let envelope = EventEnvelope::from_value(value)?;
        check_semantics(&envelope)?;
        Ok(envelope)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Semantic bounds the schema table does not express
fn check_semantics(envelope: &EventEnvelope) -> Result<(), ContractError> {
    match &envelope.payload {
        EventPayload::Reasoning { reasoning, .. } => {
            if !(0.0..=1.0).contains(&reasoning.confidence) {
                return Err(ContractError::schema(
                    envelope.name().as_str(),
                    format!("reasoning confidence {} outside [0, 1]", reasoning.confidence),
                ));
            }
        }
        EventPayload::Reflection { context, .. } => {
            if let Some(reflection) = context.reflection() {
                let reward = reflection.learning_signals.reward;
                if !(-1.0..=1.0).contains(&reward) {
                    return Err(ContractError::schema(
                        envelope.name().as_str(),
                        format!("reward {reward} outside [-1, 1]"),
                    ));
                }
            }
        }
        EventPayload::Plan { plan, .. } => {
            if plan.actions.is_empty() {
                return Err(ContractError::schema(
                    envelope.name().as_str(),
                    "plan must bind at least one action",
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Common envelope frame shared by every event schema
fn frame(data_schema: Value) -> Value {
    json!({
        "type": "object",
        "required": ["event_name", "data", "agent_id", "channel_id", "timestamp"],
        "properties": {
            "event_name": { "type": "string" },
            "agent_id": { "type": "string", "format": "uuid" },
            "channel_id": { "type": "string", "format": "uuid" },
            "timestamp": { "type": "string" },
            "correlation_id": { "type": "string", "format": "uuid" },
            "data": data_schema,
        },
    })
}

/// Per-event data schemas
fn envelope_schema(name: EventName) -> Value {
    let data = match name {
        EventName::Initialize => json!({
            "type": "object",
            "required": ["loop_id", "config", "status"],
            "properties": {
                "loop_id": { "type": "string", "format": "uuid" },
                "config": {
                    "type": "object",
                    "required": ["owner_agent_id", "max_observations"],
                },
                "status": { "type": "string" },
            },
        }),
        EventName::Started => json!({
            "type": "object",
            "required": ["loop_id", "status"],
        }),
        EventName::Observation => json!({
            "type": "object",
            "required": ["loop_id", "observation"],
            "properties": {
                "observation": {
                    "type": "object",
                    "required": ["id", "agent_id", "source", "content", "timestamp"],
                },
            },
        }),
        EventName::Reasoning => json!({
            "type": "object",
            "required": ["loop_id", "reasoning"],
            "properties": {
                "reasoning": {
                    "type": "object",
                    "required": ["id", "loop_id", "analysis", "confidence", "enhanced"],
                },
            },
        }),
        EventName::Plan => json!({
            "type": "object",
            "required": ["loop_id", "plan"],
            "properties": {
                "plan": {
                    "type": "object",
                    "required": ["plan_id", "reasoning_id", "goal", "actions"],
                    "properties": {
                        "actions": { "type": "array", "minItems": 1 },
                    },
                },
            },
        }),
        EventName::Action => json!({
            "type": "object",
            "required": ["loop_id", "action", "status"],
        }),
        EventName::Execution => json!({
            "type": "object",
            "required": ["loop_id", "action"],
        }),
        EventName::Reflection => json!({
            "type": "object",
            "required": ["loop_id", "context"],
        }),
        EventName::Stopped => json!({
            "type": "object",
            "required": ["loop_id", "status", "context"],
        }),
        EventName::PhaseViolation => json!({
            "type": "object",
            "required": ["loop_id", "tool", "phase", "allowed"],
        }),
        EventName::Hint => json!({
            "type": "object",
            "required": ["hint", "metadata"],
        }),
    };
    frame(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::{Plan, PlannedAction, Reasoning};
    use crate::phase::LoopStatus;
    use uuid::Uuid;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::with_defaults()
    }

    #[test]
    fn test_valid_envelope_passes() {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            EventPayload::Started {
                loop_id: Uuid::now_v7(),
                status: LoopStatus::Starting,
            },
        );
        registry().check(&envelope).unwrap();
    }

    #[test]
    fn test_missing_field_rejected() {
        let value = json!({
            "event_name": "orpar.started",
            "data": { "loop_id": Uuid::now_v7() },
            "agent_id": Uuid::now_v7(),
            "channel_id": Uuid::now_v7(),
            "timestamp": "2026-01-01T00:00:00Z",
        });
        let err = registry().decode(value).unwrap_err();
        assert!(matches!(err, ContractError::SchemaViolation { .. }));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let value = json!({
            "event_name": "orpar.daydream",
            "data": {},
            "agent_id": Uuid::now_v7(),
            "channel_id": Uuid::now_v7(),
            "timestamp": "2026-01-01T00:00:00Z",
        });
        let err = registry().validate(&value).unwrap_err();
        assert!(matches!(err, ContractError::UnknownEvent(_)));
    }

    #[test]
    fn test_empty_plan_rejected() {
        let loop_id = Uuid::now_v7();
        let plan = Plan::new(Uuid::now_v7(), "goal", vec![]);
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            EventPayload::Plan { loop_id, plan },
        );
        assert!(registry().check(&envelope).is_err());
    }

    #[test]
    fn test_plan_with_action_passes() {
        let loop_id = Uuid::now_v7();
        let plan = Plan::new(Uuid::now_v7(), "goal", vec![PlannedAction::step("a")]);
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            EventPayload::Plan { loop_id, plan },
        );
        registry().check(&envelope).unwrap();
    }

    #[test]
    fn test_reasoning_confidence_bounds() {
        let loop_id = Uuid::now_v7();
        let mut reasoning = Reasoning::new(loop_id, "fine", 0.5);
        // Bypass the clamping constructor to simulate a hostile sender
        reasoning.confidence = 3.0;

        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            EventPayload::Reasoning { loop_id, reasoning },
        );
        assert!(registry().check(&envelope).is_err());
    }

    #[test]
    fn test_decode_roundtrip() {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            EventPayload::Observation {
                loop_id: Uuid::now_v7(),
                observation: crate::cycle::Observation::external(
                    Uuid::now_v7(),
                    json!({"temp": 72}),
                ),
            },
        );
        let decoded = registry().decode(envelope.to_value()).unwrap();
        assert_eq!(decoded, envelope);
    }
}
