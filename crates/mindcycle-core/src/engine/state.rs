// Loop state and the phase transition table
//
// Every phase change goes through LoopState::advance, which enforces the
// closure of Observe -> Reason -> Plan -> Act* -> Reflect -> Observe.
// An invalid transition is an invariant violation and surfaces as Fatal.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use mindcycle_contracts::{LoopStatus, Observation, Phase, Plan, Reasoning};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// The engine-level state of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initializing,
    Running(Phase),
    Stopping,
    Stopped,
}

impl EngineState {
    /// The wire status this state maps to
    pub fn status(&self) -> LoopStatus {
        match self {
            EngineState::Initializing => LoopStatus::Initializing,
            EngineState::Running(_) => LoopStatus::Running,
            EngineState::Stopping => LoopStatus::Stopping,
            EngineState::Stopped => LoopStatus::Stopped,
        }
    }

    /// The current phase, if running
    pub fn phase(&self) -> Option<Phase> {
        match self {
            EngineState::Running(phase) => Some(*phase),
            _ => None,
        }
    }

    /// The transition table
    pub fn can_advance(&self, next: EngineState) -> bool {
        use EngineState::*;
        match (*self, next) {
            // Explicit stop is reachable from anywhere except Stopped
            (Stopped, _) => false,
            (_, Stopping) => true,
            (Stopping, Stopped) => true,

            (Initializing, Running(Phase::Observe)) => true,
            (Running(Phase::Observe), Running(Phase::Reason)) => true,
            (Running(Phase::Reason), Running(Phase::Plan)) => true,
            (Running(Phase::Plan), Running(Phase::Act)) => true,
            // Per-action updates keep the loop in Act
            (Running(Phase::Act), Running(Phase::Act)) => true,
            (Running(Phase::Act), Running(Phase::Reflect)) => true,
            // Reflection completion starts the next cycle
            (Running(Phase::Reflect), Running(Phase::Observe)) => true,

            _ => false,
        }
    }
}

/// The mutable state owned by one loop's mailbox task
#[derive(Debug)]
pub struct LoopState {
    pub loop_id: Uuid,
    pub owner_agent_id: Uuid,
    pub channel_id: Uuid,
    pub state: EngineState,
    pub observations: VecDeque<Observation>,
    pub current_reasoning: Option<Reasoning>,
    pub current_plan: Option<Plan>,
    pub started_at: Option<DateTime<Utc>>,
    pub cycle_started_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    max_observations: usize,
}

impl LoopState {
    pub fn new(
        loop_id: Uuid,
        owner_agent_id: Uuid,
        channel_id: Uuid,
        max_observations: usize,
    ) -> Self {
        Self {
            loop_id,
            owner_agent_id,
            channel_id,
            state: EngineState::Initializing,
            observations: VecDeque::new(),
            current_reasoning: None,
            current_plan: None,
            started_at: None,
            cycle_started_at: None,
            cycles_completed: 0,
            max_observations: max_observations.max(1),
        }
    }

    /// Advance through the transition table
    pub fn advance(&mut self, next: EngineState) -> Result<()> {
        if !self.state.can_advance(next) {
            return Err(CoreError::fatal(format!(
                "invalid transition {:?} -> {:?} for loop {}",
                self.state, next, self.loop_id
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Append an observation, evicting the oldest past the bound
    ///
    /// Returns true when an eviction happened.
    pub fn push_observation(&mut self, observation: Observation) -> bool {
        let evicted = if self.observations.len() >= self.max_observations {
            self.observations.pop_front();
            true
        } else {
            false
        };
        self.observations.push_back(observation);
        evicted
    }

    pub fn max_observations(&self) -> usize {
        self.max_observations
    }

    /// Reset per-cycle artifacts for the next Observe phase
    pub fn begin_next_cycle(&mut self) {
        self.current_reasoning = None;
        self.current_plan = None;
        self.cycle_started_at = Some(Utc::now());
        self.cycles_completed += 1;
    }
}
