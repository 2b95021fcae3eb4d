// Loop manager - many parallel loops, one mailbox each
//
// The manager owns loop handles and spawns one mailbox task per loop.
// Cross-loop work is parallel; within a loop, commands are strictly
// ordered. Collaborators are injected once at assembly time.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use mindcycle_contracts::{ActionStatus, Observation};
use mindcycle_memory::{MemoryStore, MulsEngine, Retriever, StrataRouter};

use super::runner::{CycleRunner, LoopCommand, LoopSnapshot};
use super::state::LoopState;
use crate::bus::EventBus;
use crate::error::{CoreError, Result};
use crate::llm::PhaseClient;
use crate::tools::{GatedToolRunner, ToolRegistry};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Observation buffer bound per loop
    pub max_observations: usize,
    /// Mailbox depth per loop
    pub mailbox_depth: usize,
    /// Store cycle artifacts (observations, reasoning) as memory items
    pub store_artifacts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_observations: 10,
            mailbox_depth: 64,
            store_artifacts: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_observations(mut self, max: usize) -> Self {
        self.max_observations = max.max(1);
        self
    }

    pub fn with_store_artifacts(mut self, store: bool) -> Self {
        self.store_artifacts = store;
        self
    }
}

/// Collaborators injected into every loop
pub struct EngineDeps {
    pub bus: Arc<EventBus>,
    pub registry: Arc<ToolRegistry>,
    pub tool_runner: Arc<GatedToolRunner>,
    pub phase_client: Arc<PhaseClient>,
    pub memory: Arc<dyn MemoryStore>,
    pub muls: Arc<MulsEngine>,
    pub retriever: Arc<Retriever>,
    pub router: StrataRouter,
}

struct LoopHandle {
    owner_agent_id: Uuid,
    channel_id: Uuid,
    tx: mpsc::Sender<LoopCommand>,
    cancel: CancellationToken,
}

/// Owns and drives all loops on this server
pub struct LoopManager {
    deps: Arc<EngineDeps>,
    config: EngineConfig,
    loops: DashMap<Uuid, LoopHandle>,
    /// One active loop per agent
    agent_loops: DashMap<Uuid, Uuid>,
}

impl LoopManager {
    pub fn new(deps: Arc<EngineDeps>, config: EngineConfig) -> Self {
        Self {
            deps,
            config,
            loops: DashMap::new(),
            agent_loops: DashMap::new(),
        }
    }

    /// Create a loop in the Initializing state and spawn its mailbox task
    ///
    /// An agent owns at most one active loop; a second initialize is
    /// rejected until the first loop stops.
    pub fn initialize(&self, owner_agent_id: Uuid, channel_id: Uuid) -> Result<Uuid> {
        if let Some(existing) = self.agent_loops.get(&owner_agent_id).map(|e| *e.value()) {
            // A loop that died on a fatal error leaves a closed mailbox
            let alive = self
                .loops
                .get(&existing)
                .map(|h| !h.tx.is_closed())
                .unwrap_or(false);
            if alive {
                return Err(CoreError::AgentBusy {
                    agent_id: owner_agent_id,
                    loop_id: existing,
                });
            }
            self.loops.remove(&existing);
            self.agent_loops.remove(&owner_agent_id);
        }

        let loop_id = Uuid::now_v7();
        let state = LoopState::new(
            loop_id,
            owner_agent_id,
            channel_id,
            self.config.max_observations,
        );

        let (tx, rx) = mpsc::channel(self.config.mailbox_depth);
        let cancel = CancellationToken::new();
        let runner = CycleRunner::new(
            state,
            self.deps.clone(),
            self.config.clone(),
            cancel.clone(),
        );

        tokio::spawn(runner.run(rx));

        self.loops.insert(
            loop_id,
            LoopHandle {
                owner_agent_id,
                channel_id,
                tx,
                cancel,
            },
        );
        self.agent_loops.insert(owner_agent_id, loop_id);
        info!(loop_id = %loop_id, agent = %owner_agent_id, channel = %channel_id, "loop initialized");
        Ok(loop_id)
    }

    async fn send(&self, loop_id: Uuid, command: LoopCommand) -> Result<()> {
        let tx = self
            .loops
            .get(&loop_id)
            .map(|h| h.tx.clone())
            .ok_or(CoreError::LoopNotFound(loop_id))?;
        tx.send(command)
            .await
            .map_err(|_| CoreError::LoopNotFound(loop_id))
    }

    /// Start the loop's first Observe phase
    pub async fn start(&self, loop_id: Uuid) -> Result<()> {
        self.send(loop_id, LoopCommand::Start).await
    }

    /// Submit a fully formed observation (e.g. relayed by the bridge)
    pub async fn submit(&self, loop_id: Uuid, observation: Observation) -> Result<()> {
        self.send(loop_id, LoopCommand::SubmitObservation(observation))
            .await
    }

    /// Submit an observation on behalf of the owning agent
    pub async fn submit_observation(
        &self,
        loop_id: Uuid,
        source: impl Into<String>,
        content: Value,
    ) -> Result<()> {
        let owner = self
            .loops
            .get(&loop_id)
            .map(|h| h.owner_agent_id)
            .ok_or(CoreError::LoopNotFound(loop_id))?;
        let observation = Observation::with_source(owner, source, content);
        self.send(loop_id, LoopCommand::SubmitObservation(observation))
            .await
    }

    /// Report progress of an externally executed action
    pub async fn update_action(
        &self,
        loop_id: Uuid,
        action_id: Uuid,
        status: ActionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        self.send(
            loop_id,
            LoopCommand::UpdateAction {
                action_id,
                status,
                result,
                error,
            },
        )
        .await
    }

    /// Attempt a tool call in the loop's current phase
    pub async fn try_tool(&self, loop_id: Uuid, tool: impl Into<String>, params: Value) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(
            loop_id,
            LoopCommand::TryTool {
                tool: tool.into(),
                params,
                reply: reply_tx,
            },
        )
        .await?;
        reply_rx
            .await
            .map_err(|_| CoreError::LoopNotFound(loop_id))?
    }

    /// Read-only view of a loop (processed after all queued commands)
    pub async fn snapshot(&self, loop_id: Uuid) -> Result<LoopSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(loop_id, LoopCommand::Snapshot(reply_tx)).await?;
        reply_rx.await.map_err(|_| CoreError::LoopNotFound(loop_id))
    }

    /// Stop a loop; cancels in-flight work and removes the handle
    pub async fn stop(&self, loop_id: Uuid, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.send(
            loop_id,
            LoopCommand::Stop {
                reason: reason.clone(),
            },
        )
        .await?;
        if let Some((_, handle)) = self.loops.remove(&loop_id) {
            handle.cancel.cancel();
            self.agent_loops.remove(&handle.owner_agent_id);
        }
        Ok(())
    }

    /// The active loop owned by an agent, if any
    pub fn loop_of_agent(&self, agent_id: Uuid) -> Option<Uuid> {
        self.agent_loops.get(&agent_id).map(|e| *e.value())
    }

    /// The channel a loop belongs to
    pub fn channel_of(&self, loop_id: Uuid) -> Option<Uuid> {
        self.loops.get(&loop_id).map(|h| h.channel_id)
    }

    /// All live loop ids
    pub fn loop_ids(&self) -> Vec<Uuid> {
        self.loops.iter().map(|e| *e.key()).collect()
    }
}
