// Tool descriptors - the unified namespace entry

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mindcycle_contracts::{Phase, PhaseSet};

/// How risky a tool's side effects are; selects the validation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only or trivially reversible
    Low,
    /// Writes state that is recoverable
    Medium,
    /// Irreversible or externally visible side effects
    High,
}

/// Where a tool's implementation lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSource {
    /// Built into the server, registered at startup
    Internal,
    /// Provided by an externally managed tool server
    External { server: String },
}

/// A tool in the unified namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub source: ToolSource,
    /// When set, the tool is visible only to this channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_scope: Option<Uuid>,
    /// JSON schema for parameters
    pub input_schema: serde_json::Value,
    /// JSON schema for results
    pub output_schema: serde_json::Value,
    pub risk_level: RiskLevel,
    /// Phases in which this tool may be admitted
    pub phase_allowed: PhaseSet,
}

impl ToolDescriptor {
    /// Descriptor for an internal tool, Act-phase and low-risk by default
    pub fn internal(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source: ToolSource::Internal,
            channel_scope: None,
            input_schema,
            output_schema: serde_json::json!({"type": "object"}),
            risk_level: RiskLevel::Low,
            phase_allowed: PhaseSet::only(Phase::Act),
        }
    }

    /// Descriptor for a tool hosted by an external server
    pub fn external(
        name: impl Into<String>,
        server: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source: ToolSource::External {
                server: server.into(),
            },
            channel_scope: None,
            input_schema,
            output_schema: serde_json::json!({"type": "object"}),
            risk_level: RiskLevel::Medium,
            phase_allowed: PhaseSet::only(Phase::Act),
        }
    }

    pub fn with_phases(mut self, phases: PhaseSet) -> Self {
        self.phase_allowed = phases;
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    pub fn with_channel_scope(mut self, channel_id: Uuid) -> Self {
        self.channel_scope = Some(channel_id);
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = schema;
        self
    }

    /// Whether this descriptor is visible to the given channel
    pub fn visible_to(&self, channel_id: Uuid) -> bool {
        match self.channel_scope {
            Some(scope) => scope == channel_id,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_defaults() {
        let tool = ToolDescriptor::internal("echo", "Echo back", serde_json::json!({}));
        assert_eq!(tool.source, ToolSource::Internal);
        assert_eq!(tool.risk_level, RiskLevel::Low);
        assert!(tool.phase_allowed.contains(Phase::Act));
        assert!(!tool.phase_allowed.contains(Phase::Observe));
    }

    #[test]
    fn test_channel_visibility() {
        let channel = Uuid::now_v7();
        let other = Uuid::now_v7();

        let global = ToolDescriptor::internal("a", "", serde_json::json!({}));
        assert!(global.visible_to(channel));

        let scoped = ToolDescriptor::internal("b", "", serde_json::json!({}))
            .with_channel_scope(channel);
        assert!(scoped.visible_to(channel));
        assert!(!scoped.visible_to(other));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let tool = ToolDescriptor::external(
            "search",
            "search-server",
            "Search things",
            serde_json::json!({"type": "object"}),
        )
        .with_risk(RiskLevel::High)
        .with_phases(PhaseSet::of(&[Phase::Reason, Phase::Act]));

        let json = serde_json::to_string(&tool).unwrap();
        let parsed: ToolDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tool);
    }
}
