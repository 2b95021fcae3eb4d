// Cycle artifacts - the data produced by each ORPAR phase
//
// Observations feed reasoning, reasoning produces a plan, actions carry
// results back as synthesized observations, and a reflection closes the
// cycle with learning signals for the memory system.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::phase::ActionStatus;

/// Observation source for externally submitted observations
pub const SOURCE_EXTERNAL: &str = "external";
/// Observation source for observations synthesized from completed actions
pub const SOURCE_ACTION_RESULT: &str = "action_result";

/// A single observation recorded into a loop's buffer
///
/// Immutable once recorded. Externally submitted observations carry the
/// submitter's source label; synthesized ones use [`SOURCE_ACTION_RESULT`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub source: String,
    pub content: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    /// Create an externally submitted observation
    pub fn external(agent_id: Uuid, content: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            agent_id,
            source: SOURCE_EXTERNAL.to_string(),
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create an observation with an explicit source label
    pub fn with_source(
        agent_id: Uuid,
        source: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            agent_id,
            source: source.into(),
            content,
            timestamp: Utc::now(),
        }
    }

    /// Synthesize an observation from a completed action's result
    pub fn from_action_result(agent_id: Uuid, action_id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            agent_id,
            source: SOURCE_ACTION_RESULT.to_string(),
            content: serde_json::json!({
                "action_id": action_id,
                "result": result,
            }),
            timestamp: Utc::now(),
        }
    }

    /// Whether this observation was synthesized from an action result
    pub fn is_action_result(&self) -> bool {
        self.source == SOURCE_ACTION_RESULT
    }
}

/// Reasoning artifact produced in the Reason phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub id: Uuid,
    pub loop_id: Uuid,
    /// The reasoning text itself
    pub analysis: String,
    /// Model confidence in the analysis, [0, 1]
    pub confidence: f64,
    /// False when this is the fallback artifact after an LLM failure
    pub enhanced: bool,
    pub created_at: DateTime<Utc>,
}

impl Reasoning {
    pub fn new(loop_id: Uuid, analysis: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: Uuid::now_v7(),
            loop_id,
            analysis: analysis.into(),
            confidence: confidence.clamp(0.0, 1.0),
            enhanced: true,
            created_at: Utc::now(),
        }
    }

    /// The degraded artifact produced when the LLM call fails
    pub fn fallback(loop_id: Uuid, analysis: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            loop_id,
            analysis: analysis.into(),
            confidence: 0.0,
            enhanced: false,
            created_at: Utc::now(),
        }
    }
}

/// A single action inside a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub id: Uuid,
    pub description: String,
    /// Tool to invoke, if this action executes a tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Lower numbers execute first
    pub priority: u8,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlannedAction {
    /// Create a pending action that invokes a tool
    pub fn tool_call(
        description: impl Into<String>,
        tool: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            description: description.into(),
            tool: Some(tool.into()),
            parameters: Some(parameters),
            priority: 0,
            status: ActionStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Create a pending action with no tool (pure description step)
    pub fn step(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            description: description.into(),
            tool: None,
            parameters: None,
            priority: 0,
            status: ActionStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Set the priority (builder style)
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// A plan bound to a loop in the Plan phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    /// The reasoning artifact this plan was derived from
    pub reasoning_id: Uuid,
    pub goal: String,
    pub actions: Vec<PlannedAction>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(reasoning_id: Uuid, goal: impl Into<String>, actions: Vec<PlannedAction>) -> Self {
        Self {
            plan_id: Uuid::now_v7(),
            reasoning_id,
            goal: goal.into(),
            actions,
            created_at: Utc::now(),
        }
    }

    /// A plan is terminal when every action reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.actions.iter().all(|a| a.status.is_terminal())
    }

    /// Find an action by id
    pub fn action(&self, action_id: Uuid) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    /// Find an action by id, mutably
    pub fn action_mut(&mut self, action_id: Uuid) -> Option<&mut PlannedAction> {
        self.actions.iter_mut().find(|a| a.id == action_id)
    }

    /// Count actions currently in a terminal status
    pub fn terminal_count(&self) -> usize {
        self.actions.iter().filter(|a| a.status.is_terminal()).count()
    }
}

/// Aggregate metrics computed during reflection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReflectionMetrics {
    pub total_actions: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// completed / total
    pub success_rate: f64,
    /// terminal / total
    pub completion_rate: f64,
    /// failed / total
    pub error_rate: f64,
    pub duration_ms: u64,
}

impl ReflectionMetrics {
    /// Compute metrics from a terminal plan and cycle duration
    pub fn from_plan(plan: &Plan, duration_ms: u64) -> Self {
        let total = plan.actions.len();
        let completed = plan
            .actions
            .iter()
            .filter(|a| a.status == ActionStatus::Completed)
            .count();
        let failed = plan
            .actions
            .iter()
            .filter(|a| a.status == ActionStatus::Failed)
            .count();
        let skipped = plan
            .actions
            .iter()
            .filter(|a| a.status == ActionStatus::Skipped)
            .count();
        let denom = total.max(1) as f64;

        Self {
            total_actions: total,
            completed,
            failed,
            skipped,
            success_rate: completed as f64 / denom,
            completion_rate: plan.terminal_count() as f64 / denom,
            error_rate: failed as f64 / denom,
            duration_ms,
        }
    }
}

/// Learning signals carried by a reflection
///
/// `reward` drives the memory system's Q-value updates. Attribution is
/// uniform across the items touched in a phase unless `item_confidence`
/// supplies a per-item value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSignals {
    /// Reward in [-1, +1]
    pub reward: f64,
    /// Overall confidence in the reward, [0, 1]
    pub confidence: f64,
    /// Optional per-memory-item confidence override
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub item_confidence: HashMap<Uuid, f64>,
}

impl LearningSignals {
    pub fn new(reward: f64, confidence: f64) -> Self {
        Self {
            reward: reward.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            item_confidence: HashMap::new(),
        }
    }

    /// Confidence to use for a specific item (falls back to the global value)
    pub fn confidence_for(&self, memory_id: Uuid) -> f64 {
        self.item_confidence
            .get(&memory_id)
            .copied()
            .unwrap_or(self.confidence)
    }
}

/// Reflection closing a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub reflection_id: Uuid,
    pub plan_id: Uuid,
    pub success: bool,
    pub metrics: ReflectionMetrics,
    pub insights: Vec<String>,
    pub improvements: Vec<String>,
    pub learning_signals: LearningSignals,
    pub created_at: DateTime<Utc>,
}

impl Reflection {
    pub fn new(
        plan_id: Uuid,
        success: bool,
        metrics: ReflectionMetrics,
        learning_signals: LearningSignals,
    ) -> Self {
        Self {
            reflection_id: Uuid::now_v7(),
            plan_id,
            success,
            metrics,
            insights: Vec::new(),
            improvements: Vec::new(),
            learning_signals,
            created_at: Utc::now(),
        }
    }

    pub fn with_insight(mut self, insight: impl Into<String>) -> Self {
        self.insights.push(insight.into());
        self
    }

    pub fn with_improvement(mut self, improvement: impl Into<String>) -> Self {
        self.improvements.push(improvement.into());
        self
    }
}

/// Summary of a loop's configuration carried by the initialize event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfigSummary {
    pub owner_agent_id: Uuid,
    pub max_observations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_result_observation_shape() {
        let agent = Uuid::now_v7();
        let action = Uuid::now_v7();
        let obs =
            Observation::from_action_result(agent, action, serde_json::json!({"exit": 0}));

        assert!(obs.is_action_result());
        assert_eq!(obs.source, SOURCE_ACTION_RESULT);
        assert_eq!(obs.content["action_id"], serde_json::json!(action));
        assert_eq!(obs.content["result"]["exit"], serde_json::json!(0));
    }

    #[test]
    fn test_plan_terminal() {
        let mut plan = Plan::new(
            Uuid::now_v7(),
            "test goal",
            vec![
                PlannedAction::step("first"),
                PlannedAction::step("second"),
            ],
        );
        assert!(!plan.is_terminal());

        plan.actions[0].status = ActionStatus::Completed;
        assert!(!plan.is_terminal());

        plan.actions[1].status = ActionStatus::Skipped;
        assert!(plan.is_terminal());
        assert_eq!(plan.terminal_count(), 2);
    }

    #[test]
    fn test_reflection_metrics_from_plan() {
        let mut plan = Plan::new(
            Uuid::now_v7(),
            "goal",
            vec![
                PlannedAction::step("a"),
                PlannedAction::step("b"),
                PlannedAction::step("c"),
                PlannedAction::step("d"),
            ],
        );
        plan.actions[0].status = ActionStatus::Completed;
        plan.actions[1].status = ActionStatus::Completed;
        plan.actions[2].status = ActionStatus::Failed;
        plan.actions[3].status = ActionStatus::Skipped;

        let metrics = ReflectionMetrics::from_plan(&plan, 1234);
        assert_eq!(metrics.total_actions, 4);
        assert_eq!(metrics.completed, 2);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.skipped, 1);
        assert_eq!(metrics.success_rate, 0.5);
        assert_eq!(metrics.completion_rate, 1.0);
        assert_eq!(metrics.error_rate, 0.25);
        assert_eq!(metrics.duration_ms, 1234);
    }

    #[test]
    fn test_learning_signals_clamped() {
        let signals = LearningSignals::new(2.5, -0.3);
        assert_eq!(signals.reward, 1.0);
        assert_eq!(signals.confidence, 0.0);
    }

    #[test]
    fn test_learning_signals_item_confidence_fallback() {
        let mut signals = LearningSignals::new(1.0, 0.8);
        let known = Uuid::now_v7();
        let unknown = Uuid::now_v7();
        signals.item_confidence.insert(known, 0.4);

        assert_eq!(signals.confidence_for(known), 0.4);
        assert_eq!(signals.confidence_for(unknown), 0.8);
    }

    #[test]
    fn test_reasoning_fallback_flags() {
        let reasoning = Reasoning::fallback(Uuid::now_v7(), "no model available");
        assert!(!reasoning.enhanced);
        assert_eq!(reasoning.confidence, 0.0);
    }
}
