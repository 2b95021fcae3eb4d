// MetadataMap - the typed replacement for loose context blobs
//
// A small closed set of keys is recognized by the core; unknown keys are
// preserved verbatim but never interpreted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cycle::Reflection;
use crate::phase::Phase;

/// Recognized key: human-readable reason for a lifecycle transition
pub const KEY_REASON: &str = "reason";
/// Recognized key: the agent that owns the loop
pub const KEY_LOOP_OWNER_ID: &str = "loop_owner_id";
/// Recognized key: a full reflection artifact
pub const KEY_REFLECTION: &str = "reflection";
/// Recognized key: the ORPAR phase attached to a hint event
pub const KEY_ORPAR_PHASE: &str = "orpar_phase";

/// String-keyed metadata with typed accessors for the recognized keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataMap(BTreeMap<String, serde_json::Value>);

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw value under any key
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Get a raw value
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    // Builder-style setters for the recognized keys

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.insert(KEY_REASON, serde_json::Value::String(reason.into()));
        self
    }

    pub fn with_loop_owner(mut self, agent_id: Uuid) -> Self {
        self.insert(KEY_LOOP_OWNER_ID, serde_json::json!(agent_id));
        self
    }

    pub fn with_reflection(mut self, reflection: &Reflection) -> Self {
        // Serialization of our own wire type cannot fail
        if let Ok(value) = serde_json::to_value(reflection) {
            self.insert(KEY_REFLECTION, value);
        }
        self
    }

    pub fn with_orpar_phase(mut self, phase: Phase) -> Self {
        self.insert(KEY_ORPAR_PHASE, serde_json::Value::String(phase.as_str().into()));
        self
    }

    // Typed accessors for the recognized keys

    pub fn reason(&self) -> Option<&str> {
        self.get(KEY_REASON).and_then(|v| v.as_str())
    }

    pub fn loop_owner_id(&self) -> Option<Uuid> {
        self.get(KEY_LOOP_OWNER_ID)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn reflection(&self) -> Option<Reflection> {
        self.get(KEY_REFLECTION)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn orpar_phase(&self) -> Option<Phase> {
        self.get(KEY_ORPAR_PHASE)
            .and_then(|v| v.as_str())
            .and_then(Phase::parse)
    }
}
