// Per-loop mailbox runner
//
// Each loop is an actor: commands arrive on an mpsc mailbox and are
// processed strictly in order, which gives within-loop event ordering
// for free. Suspension happens only at LLM calls, tool executions, and
// memory operations, all under the loop's cancellation token.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mindcycle_contracts::{
    ActionStatus, EventEnvelope, EventPayload, LearningSignals, LoopConfigSummary, MetadataMap,
    Observation, Phase, Plan, Reasoning, Reflection, ReflectionMetrics,
};
use mindcycle_memory::{CycleTracker, MemoryItem, MemoryScope, MemoryStratum};

use super::manager::{EngineConfig, EngineDeps};
use super::state::{EngineState, LoopState};
use crate::error::{CoreError, Result};

/// Commands a loop's mailbox accepts
pub enum LoopCommand {
    /// Begin the first Observe phase
    Start,
    /// Record an observation (external submission)
    SubmitObservation(Observation),
    /// Externally executed action progressed
    UpdateAction {
        action_id: Uuid,
        status: ActionStatus,
        result: Option<Value>,
        error: Option<String>,
    },
    /// Attempt a tool call in the current phase
    TryTool {
        tool: String,
        params: Value,
        reply: oneshot::Sender<Result<Value>>,
    },
    /// Read-only view of the loop
    Snapshot(oneshot::Sender<LoopSnapshot>),
    /// Stop the loop
    Stop { reason: String },
}

/// Read-only view of a loop's state
#[derive(Debug, Clone)]
pub struct LoopSnapshot {
    pub loop_id: Uuid,
    pub owner_agent_id: Uuid,
    pub channel_id: Uuid,
    pub status: mindcycle_contracts::LoopStatus,
    pub phase: Option<Phase>,
    pub observations: Vec<Observation>,
    pub current_reasoning: Option<Reasoning>,
    pub current_plan: Option<Plan>,
    pub cycles_completed: u64,
}

/// Drives one loop until it stops
pub(super) struct CycleRunner {
    state: LoopState,
    deps: Arc<EngineDeps>,
    config: EngineConfig,
    tracker: CycleTracker,
    token: CancellationToken,
}

impl CycleRunner {
    pub(super) fn new(
        state: LoopState,
        deps: Arc<EngineDeps>,
        config: EngineConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            state,
            deps,
            config,
            tracker: CycleTracker::new(),
            token,
        }
    }

    /// The mailbox loop; returns when the loop reaches Stopped
    pub(super) async fn run(mut self, mut rx: mpsc::Receiver<LoopCommand>) {
        self.emit(EventPayload::Initialize {
            loop_id: self.state.loop_id,
            config: LoopConfigSummary {
                owner_agent_id: self.state.owner_agent_id,
                max_observations: self.state.max_observations(),
            },
            status: self.state.state.status(),
        });

        while let Some(command) = rx.recv().await {
            let stop = matches!(&command, LoopCommand::Stop { .. });
            match self.handle(command).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    // Cooperative cancellation: cease work, await the Stop
                    debug!(loop_id = %self.state.loop_id, "command cancelled");
                }
                Err(e) if e.is_fatal() => {
                    error!(loop_id = %self.state.loop_id, error = %e, "fatal engine error");
                    self.terminate(format!("fatal: {e}"));
                    return;
                }
                Err(e) => {
                    // Phase-handling errors are logged and do not advance phase
                    warn!(
                        loop_id = %self.state.loop_id,
                        phase = ?self.state.state.phase(),
                        error = %e,
                        "phase handler error"
                    );
                }
            }
            if stop {
                return;
            }
        }
    }

    async fn handle(&mut self, command: LoopCommand) -> Result<()> {
        match command {
            LoopCommand::Start => self.start(),
            LoopCommand::SubmitObservation(observation) => self.observe(observation).await,
            LoopCommand::UpdateAction {
                action_id,
                status,
                result,
                error,
            } => self.update_action(action_id, status, result, error).await,
            LoopCommand::TryTool { tool, params, reply } => {
                let outcome = self.try_tool(&tool, params).await;
                let _ = reply.send(outcome);
                Ok(())
            }
            LoopCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                Ok(())
            }
            LoopCommand::Stop { reason } => {
                self.stop(reason);
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            loop_id: self.state.loop_id,
            owner_agent_id: self.state.owner_agent_id,
            channel_id: self.state.channel_id,
            status: self.state.state.status(),
            phase: self.state.state.phase(),
            observations: self.state.observations.iter().cloned().collect(),
            current_reasoning: self.state.current_reasoning.clone(),
            current_plan: self.state.current_plan.clone(),
            cycles_completed: self.state.cycles_completed,
        }
    }

    fn start(&mut self) -> Result<()> {
        self.state.advance(EngineState::Running(Phase::Observe))?;
        self.state.started_at = Some(Utc::now());
        self.state.cycle_started_at = Some(Utc::now());
        info!(loop_id = %self.state.loop_id, "loop started");
        self.emit(EventPayload::Started {
            loop_id: self.state.loop_id,
            status: mindcycle_contracts::LoopStatus::Starting,
        });
        Ok(())
    }

    /// Record an observation and drive the cycle forward
    async fn observe(&mut self, observation: Observation) -> Result<()> {
        if !self.state.state.status().is_active() {
            debug!(loop_id = %self.state.loop_id, "observation ignored, loop not active");
            return Ok(());
        }

        let evicted = self.state.push_observation(observation.clone());
        if evicted {
            debug!(loop_id = %self.state.loop_id, "observation buffer evicted oldest entry");
        }

        self.emit(EventPayload::Observation {
            loop_id: self.state.loop_id,
            observation: observation.clone(),
        });

        self.remember(
            MemoryStratum::Working,
            format!("observation:{}", observation.id),
            observation.content.clone(),
            Phase::Observe,
        )
        .await;

        match self.state.state {
            EngineState::Running(Phase::Observe) => {
                self.state.advance(EngineState::Running(Phase::Reason))?;
                self.run_reason().await
            }
            // An earlier LLM failure left the loop here; new input retries
            EngineState::Running(Phase::Reason) => self.run_reason().await,
            EngineState::Running(Phase::Plan) => self.run_plan().await,
            _ => Ok(()),
        }
    }

    /// The Reason phase: produce a reasoning artifact
    async fn run_reason(&mut self) -> Result<()> {
        let memories = self.recall(Phase::Reason).await;
        let observations: Vec<Observation> = self.state.observations.iter().cloned().collect();

        match self
            .deps
            .phase_client
            .reason(self.state.loop_id, &observations, &memories, &self.token)
            .await
        {
            Ok(reasoning) => {
                self.state.current_reasoning = Some(reasoning.clone());
                self.emit(EventPayload::Reasoning {
                    loop_id: self.state.loop_id,
                    reasoning: reasoning.clone(),
                });
                self.remember(
                    MemoryStratum::ShortTerm,
                    format!("reasoning:{}", reasoning.id),
                    serde_json::json!(reasoning.analysis),
                    Phase::Reason,
                )
                .await;

                self.state.advance(EngineState::Running(Phase::Plan))?;
                self.run_plan().await
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                // Degraded path: fallback artifact, phase stays at Reason
                warn!(loop_id = %self.state.loop_id, error = %e, "reasoning failed, producing fallback");
                let fallback = Reasoning::fallback(
                    self.state.loop_id,
                    "Reasoning unavailable; retaining observations for the next attempt.",
                );
                self.state.current_reasoning = Some(fallback.clone());
                self.emit(EventPayload::Reasoning {
                    loop_id: self.state.loop_id,
                    reasoning: fallback,
                });
                Ok(())
            }
        }
    }

    /// The Plan phase: bind a plan with at least one action
    async fn run_plan(&mut self) -> Result<()> {
        let Some(reasoning) = self.state.current_reasoning.clone() else {
            return Err(CoreError::fatal("plan phase without a reasoning artifact"));
        };

        let memories = self.recall(Phase::Plan).await;
        // Plans name tools that will execute in the Act phase
        let tools = self
            .deps
            .registry
            .list_available(self.state.channel_id, Phase::Act);

        match self
            .deps
            .phase_client
            .plan(&reasoning, &tools, &memories, &self.token)
            .await
        {
            Ok(plan) => {
                self.state.current_plan = Some(plan.clone());
                self.emit(EventPayload::Plan {
                    loop_id: self.state.loop_id,
                    plan,
                });
                self.state.advance(EngineState::Running(Phase::Act))?;
                self.run_act().await
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                // No plan bound; stay at Plan and let new input retry
                warn!(loop_id = %self.state.loop_id, error = %e, "planning failed, staying in plan phase");
                Ok(())
            }
        }
    }

    /// The Act phase: execute plan actions in priority order
    async fn run_act(&mut self) -> Result<()> {
        let Some(plan) = self.state.current_plan.clone() else {
            return Err(CoreError::fatal("act phase without a bound plan"));
        };

        let mut order: Vec<Uuid> = {
            let mut actions: Vec<&mindcycle_contracts::PlannedAction> = plan
                .actions
                .iter()
                .filter(|a| !a.status.is_terminal())
                .collect();
            actions.sort_by_key(|a| a.priority);
            actions.iter().map(|a| a.id).collect()
        };

        for action_id in order.drain(..) {
            if self.token.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            self.execute_action(action_id).await?;
        }

        self.maybe_reflect().await
    }

    /// Execute one action and publish its status updates
    async fn execute_action(&mut self, action_id: Uuid) -> Result<()> {
        let (tool, params, action_snapshot) = {
            let plan = self
                .state
                .current_plan
                .as_mut()
                .ok_or_else(|| CoreError::fatal("action without a plan"))?;
            let action = plan
                .action_mut(action_id)
                .ok_or_else(|| CoreError::fatal("unknown action id in plan"))?;
            action.status = ActionStatus::InProgress;
            (
                action.tool.clone(),
                action.parameters.clone().unwrap_or(Value::Null),
                action.clone(),
            )
        };

        self.emit(EventPayload::Action {
            loop_id: self.state.loop_id,
            action: action_snapshot.clone(),
            status: ActionStatus::InProgress,
        });
        self.emit(EventPayload::Execution {
            loop_id: self.state.loop_id,
            action: action_snapshot,
        });

        let outcome = match &tool {
            Some(tool_name) => Some(
                self.deps
                    .tool_runner
                    .run(
                        self.state.channel_id,
                        Phase::Act,
                        tool_name,
                        params,
                        &self.token,
                    )
                    .await,
            ),
            // Pure description steps complete immediately
            None => None,
        };

        let (status, result, error) = match outcome {
            None => (ActionStatus::Completed, None, None),
            Some(Ok(value)) => (ActionStatus::Completed, Some(value), None),
            Some(Err(e)) if e.is_cancelled() => return Err(CoreError::Cancelled),
            Some(Err(e)) => {
                if let CoreError::PhaseViolation { tool, phase, allowed } = &e {
                    self.emit(EventPayload::PhaseViolation {
                        loop_id: self.state.loop_id,
                        tool: tool.clone(),
                        phase: *phase,
                        allowed: *allowed,
                    });
                }
                (ActionStatus::Failed, None, Some(e.to_string()))
            }
        };

        self.finish_action(action_id, status, result, error).await
    }

    /// Apply a terminal (or progress) status to an action
    async fn finish_action(
        &mut self,
        action_id: Uuid,
        status: ActionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        let action_snapshot = {
            let plan = self
                .state
                .current_plan
                .as_mut()
                .ok_or_else(|| CoreError::fatal("action update without a plan"))?;
            let action = plan
                .action_mut(action_id)
                .ok_or_else(|| CoreError::fatal("unknown action id in plan"))?;
            action.status = status;
            action.result = result.clone();
            action.error = error;
            action.clone()
        };

        self.emit(EventPayload::Action {
            loop_id: self.state.loop_id,
            action: action_snapshot,
            status,
        });

        // Successful actions with a non-empty result become observations
        // for the next cycle
        if status == ActionStatus::Completed {
            if let Some(result) = result {
                if !result.is_null() {
                    let observation = Observation::from_action_result(
                        self.state.owner_agent_id,
                        action_id,
                        result,
                    );
                    self.state.push_observation(observation.clone());
                    self.remember(
                        MemoryStratum::Working,
                        format!("observation:{}", observation.id),
                        observation.content.clone(),
                        Phase::Act,
                    )
                    .await;
                }
            }
        }

        Ok(())
    }

    /// External action update (actions executed by remote collaborators)
    async fn update_action(
        &mut self,
        action_id: Uuid,
        status: ActionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        if self.state.state != EngineState::Running(Phase::Act) {
            return Err(CoreError::tool(
                "action updates are only accepted in the Act phase",
            ));
        }
        self.state.advance(EngineState::Running(Phase::Act))?;
        self.finish_action(action_id, status, result, error).await?;
        self.maybe_reflect().await
    }

    /// Enter Reflect when every action is terminal
    async fn maybe_reflect(&mut self) -> Result<()> {
        let all_terminal = self
            .state
            .current_plan
            .as_ref()
            .map(|p| p.is_terminal())
            .unwrap_or(false);
        if !all_terminal || self.state.state != EngineState::Running(Phase::Act) {
            return Ok(());
        }

        self.state.advance(EngineState::Running(Phase::Reflect))?;
        self.run_reflect().await
    }

    /// The Reflect phase: metrics, insights, learning signals, consolidation
    async fn run_reflect(&mut self) -> Result<()> {
        let plan = self
            .state
            .current_plan
            .clone()
            .ok_or_else(|| CoreError::fatal("reflect phase without a plan"))?;

        let duration_ms = self
            .state
            .cycle_started_at
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        let metrics = ReflectionMetrics::from_plan(&plan, duration_ms);
        let success = metrics.failed == 0 && metrics.completed > 0;
        let reward = if success { 1.0 } else { -1.0 };
        let signals = LearningSignals::new(reward, 1.0);

        let mut reflection = Reflection::new(plan.plan_id, success, metrics.clone(), signals.clone());
        if success {
            reflection = reflection.with_insight(format!(
                "all {} actions completed in {}ms",
                metrics.total_actions, metrics.duration_ms
            ));
        } else {
            for action in plan.actions.iter().filter(|a| a.status == ActionStatus::Failed) {
                reflection = reflection.with_insight(format!(
                    "action '{}' failed: {}",
                    action.description,
                    action.error.as_deref().unwrap_or("unknown error")
                ));
                if let Some(tool) = &action.tool {
                    reflection =
                        reflection.with_improvement(format!("review parameters for tool '{tool}'"));
                }
            }
        }

        self.emit(EventPayload::Reflection {
            loop_id: self.state.loop_id,
            context: MetadataMap::new().with_reflection(&reflection),
        });

        // Close the feedback loop into memory
        if let Err(e) = self
            .deps
            .muls
            .complete_cycle(&signals, &self.tracker)
            .await
        {
            warn!(loop_id = %self.state.loop_id, error = %e, "cycle consolidation failed");
        }
        self.tracker.clear();

        info!(
            loop_id = %self.state.loop_id,
            success,
            cycles = self.state.cycles_completed + 1,
            "cycle reflected"
        );

        if self.state.state.status().is_active() {
            self.state.advance(EngineState::Running(Phase::Observe))?;
            self.state.begin_next_cycle();
        }
        Ok(())
    }

    /// Attempt a tool call in the loop's current phase
    async fn try_tool(&mut self, tool: &str, params: Value) -> Result<Value> {
        let Some(phase) = self.state.state.phase() else {
            return Err(CoreError::tool("loop is not in an active phase"));
        };

        let outcome = self
            .deps
            .tool_runner
            .run(self.state.channel_id, phase, tool, params, &self.token)
            .await;

        if let Err(CoreError::PhaseViolation { tool, phase, allowed }) = &outcome {
            self.emit(EventPayload::PhaseViolation {
                loop_id: self.state.loop_id,
                tool: tool.clone(),
                phase: *phase,
                allowed: *allowed,
            });
        }
        outcome
    }

    fn stop(&mut self, reason: String) {
        if self.state.state == EngineState::Stopped {
            return;
        }
        info!(loop_id = %self.state.loop_id, %reason, "loop stopping");
        self.terminate(reason);
    }

    fn terminate(&mut self, reason: String) {
        self.token.cancel();
        let _ = self.state.advance(EngineState::Stopping);
        self.emit(EventPayload::Stopped {
            loop_id: self.state.loop_id,
            status: mindcycle_contracts::LoopStatus::Stopping,
            context: MetadataMap::new()
                .with_reason(reason)
                .with_loop_owner(self.state.owner_agent_id),
        });
        let _ = self.state.advance(EngineState::Stopped);
    }

    /// Store a cycle artifact as a memory item and track the touch
    async fn remember(
        &mut self,
        stratum: MemoryStratum,
        key: String,
        value: Value,
        phase: Phase,
    ) {
        if !self.config.store_artifacts {
            return;
        }
        let item = MemoryItem::new(
            MemoryScope::Agent,
            self.state.owner_agent_id,
            stratum,
            key,
            value,
        );
        match self.deps.memory.put(item).await {
            Ok(memory_id) => self.tracker.touch(phase, memory_id),
            Err(e) => warn!(loop_id = %self.state.loop_id, error = %e, "failed to store cycle artifact"),
        }
    }

    /// Retrieve memories routed for a phase; degraded paths return empty
    async fn recall(&mut self, phase: Phase) -> Vec<String> {
        let route = self.deps.router.route(Some(phase));
        let query = self
            .state
            .observations
            .back()
            .map(|o| o.content.to_string())
            .unwrap_or_default();

        match self
            .deps
            .retriever
            .retrieve(
                self.state.channel_id,
                MemoryScope::Agent,
                self.state.owner_agent_id,
                &query,
                &route,
            )
            .await
        {
            Ok(scored) => scored
                .into_iter()
                .map(|m| {
                    self.tracker.touch(phase, m.item.memory_id);
                    format!("{}: {}", m.item.key, m.item.value)
                })
                .collect(),
            Err(e) => {
                // Retrieval never fails a phase
                warn!(loop_id = %self.state.loop_id, error = %e, "memory retrieval degraded to empty");
                Vec::new()
            }
        }
    }

    fn emit(&self, payload: EventPayload) {
        let envelope = EventEnvelope::new(
            self.state.owner_agent_id,
            self.state.channel_id,
            payload,
        );
        if let Err(e) = self.deps.bus.emit(envelope) {
            error!(loop_id = %self.state.loop_id, error = %e, "event emission failed");
        }
    }
}
