// Agent directory
//
// Tracks agent identity and lifecycle on the server side. A socket
// handshake connects an agent to its primary channel; an agent connected
// elsewhere keeps its original channel (one primary channel at a time).

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use mindcycle_contracts::{Agent, AgentStatus};

use crate::auth::RejectReason;

/// Directory of agents known to this server
#[derive(Default)]
pub struct AgentDirectory {
    agents: DashMap<Uuid, Agent>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent on a channel
    pub fn register(&self, channel_id: Uuid) -> Agent {
        let agent = Agent::new(channel_id);
        self.agents.insert(agent.agent_id, agent.clone());
        agent
    }

    /// Insert a pre-built agent record
    pub fn insert(&self, agent: Agent) {
        self.agents.insert(agent.agent_id, agent);
    }

    pub fn get(&self, agent_id: Uuid) -> Option<Agent> {
        self.agents.get(&agent_id).map(|a| a.value().clone())
    }

    /// Mark an agent connected via a handshake on `channel_id`
    ///
    /// Unknown agents are registered on the handshake channel. Known
    /// agents must connect on their primary channel.
    pub fn connect(&self, agent_id: Uuid, channel_id: Uuid) -> Result<(), RejectReason> {
        let mut entry = self.agents.entry(agent_id).or_insert_with(|| {
            let mut agent = Agent::new(channel_id);
            agent.agent_id = agent_id;
            agent
        });
        let agent = entry.value_mut();

        if agent.channel_id != channel_id {
            return Err(RejectReason::ChannelMismatch);
        }
        if agent.status != AgentStatus::Connected && !agent.transition(AgentStatus::Connected) {
            // Active or Paused agents reconnecting keep their state
            return Ok(());
        }
        info!(agent_id = %agent_id, channel = %channel_id, "agent connected");
        Ok(())
    }

    /// Mark an agent disconnected (socket closed)
    pub fn disconnect(&self, agent_id: Uuid) {
        if let Some(mut agent) = self.agents.get_mut(&agent_id) {
            if agent.transition(AgentStatus::Disconnected) {
                info!(agent_id = %agent_id, "agent disconnected");
            }
        }
    }

    /// Pause an active agent
    pub fn pause(&self, agent_id: Uuid) -> bool {
        self.agents
            .get_mut(&agent_id)
            .map(|mut a| a.transition(AgentStatus::Paused))
            .unwrap_or(false)
    }

    /// Resume a paused agent
    pub fn resume(&self, agent_id: Uuid) -> bool {
        self.agents
            .get_mut(&agent_id)
            .map(|mut a| a.transition(AgentStatus::Active))
            .unwrap_or(false)
    }

    /// Mark a connected agent active (it started a loop)
    pub fn activate(&self, agent_id: Uuid) -> bool {
        self.agents
            .get_mut(&agent_id)
            .map(|mut a| a.transition(AgentStatus::Active))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
