// Agent identity and lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an agent
///
/// registered -> connected -> (paused <-> active) -> disconnected;
/// a disconnected agent may reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Registered,
    Connected,
    Active,
    Paused,
    Disconnected,
}

impl AgentStatus {
    /// The lifecycle transition table
    pub fn can_transition(&self, to: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (*self, to),
            (Registered, Connected)
                | (Connected, Active)
                | (Connected, Disconnected)
                | (Active, Paused)
                | (Active, Disconnected)
                | (Paused, Active)
                | (Paused, Disconnected)
                | (Disconnected, Connected)
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Registered => "registered",
            AgentStatus::Connected => "connected",
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
            AgentStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// LLM configuration attached to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LlmProfile {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// An agent known to the server
///
/// An agent belongs to exactly one primary channel at a time and owns at
/// most one active loop (enforced by the loop manager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: Uuid,
    pub channel_id: Uuid,
    pub capabilities: Vec<String>,
    pub llm: LlmProfile,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(channel_id: Uuid) -> Self {
        Self {
            agent_id: Uuid::now_v7(),
            channel_id,
            capabilities: Vec::new(),
            llm: LlmProfile::default(),
            status: AgentStatus::Registered,
            registered_at: Utc::now(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_llm(mut self, llm: LlmProfile) -> Self {
        self.llm = llm;
        self
    }

    /// Apply a lifecycle transition; returns false (unchanged) if invalid
    pub fn transition(&mut self, to: AgentStatus) -> bool {
        if self.status.can_transition(to) {
            self.status = to;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let mut agent = Agent::new(Uuid::now_v7());
        assert_eq!(agent.status, AgentStatus::Registered);

        assert!(agent.transition(AgentStatus::Connected));
        assert!(agent.transition(AgentStatus::Active));
        assert!(agent.transition(AgentStatus::Paused));
        assert!(agent.transition(AgentStatus::Active));
        assert!(agent.transition(AgentStatus::Disconnected));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut agent = Agent::new(Uuid::now_v7());

        // Registered cannot jump straight to Active
        assert!(!agent.transition(AgentStatus::Active));
        assert_eq!(agent.status, AgentStatus::Registered);

        // Disconnected agents reconnect, they do not re-register
        agent.transition(AgentStatus::Connected);
        agent.transition(AgentStatus::Disconnected);
        assert!(!agent.transition(AgentStatus::Registered));
        assert!(agent.transition(AgentStatus::Connected));
    }
}
