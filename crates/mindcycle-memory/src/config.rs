// Configuration for MULS and retrieval

use serde::{Deserialize, Serialize};

use mindcycle_contracts::Phase;

/// Per-phase reward attribution weights
///
/// A reflection reward `r` reaches an item touched in phase `p` as
/// `r * weight(p) * confidence`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseWeights {
    pub observe: f64,
    pub reason: f64,
    pub plan: f64,
    pub act: f64,
    pub reflect: f64,
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self {
            observe: 0.15,
            reason: 0.20,
            plan: 0.30,
            act: 0.25,
            reflect: 0.10,
        }
    }
}

impl PhaseWeights {
    /// Weight for a phase
    pub fn get(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Observe => self.observe,
            Phase::Reason => self.reason,
            Phase::Plan => self.plan,
            Phase::Act => self.act,
            Phase::Reflect => self.reflect,
        }
    }
}

/// Configuration for the memory utility learning system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulsConfig {
    /// EMA learning rate alpha
    pub learning_rate: f64,

    /// Reward attribution weights per phase
    pub phase_weights: PhaseWeights,

    /// Promote to a longer-lived stratum at or above this Q-value
    pub promote_q_threshold: f64,

    /// ... and at least this many successes
    pub promote_success_count: u32,

    /// Demote at or below this Q-value
    pub demote_q_threshold: f64,

    /// ... and at least this many failures
    pub demote_failure_count: u32,
}

impl Default for MulsConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            phase_weights: PhaseWeights::default(),
            promote_q_threshold: 0.7,
            promote_success_count: 3,
            demote_q_threshold: 0.3,
            demote_failure_count: 5,
        }
    }
}

impl MulsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the EMA learning rate (clamped to (0, 1])
    pub fn with_learning_rate(mut self, alpha: f64) -> Self {
        self.learning_rate = alpha.clamp(f64::EPSILON, 1.0);
        self
    }

    /// Set the promotion thresholds
    pub fn with_promotion(mut self, q_threshold: f64, success_count: u32) -> Self {
        self.promote_q_threshold = q_threshold.clamp(0.0, 1.0);
        self.promote_success_count = success_count;
        self
    }

    /// Set the demotion thresholds
    pub fn with_demotion(mut self, q_threshold: f64, failure_count: u32) -> Self {
        self.demote_q_threshold = q_threshold.clamp(0.0, 1.0);
        self.demote_failure_count = failure_count;
        self
    }

    /// Override the phase weights
    pub fn with_phase_weights(mut self, weights: PhaseWeights) -> Self {
        self.phase_weights = weights;
        self
    }
}

/// Configuration for the two-phase retrieval path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates requested from the similarity backend
    pub top_k: usize,

    /// Results returned after re-ranking
    pub top_n: usize,

    /// Min-max normalize Q-values across the candidate set before blending
    pub normalize_q: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            top_n: 5,
            normalize_q: false,
        }
    }
}

impl RetrievalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k.max(1);
        self
    }

    pub fn with_top_n(mut self, n: usize) -> Self {
        self.top_n = n.max(1);
        self
    }

    pub fn with_normalize_q(mut self, normalize: bool) -> Self {
        self.normalize_q = normalize;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_phase_weights() {
        let weights = PhaseWeights::default();
        assert_eq!(weights.get(Phase::Observe), 0.15);
        assert_eq!(weights.get(Phase::Reason), 0.20);
        assert_eq!(weights.get(Phase::Plan), 0.30);
        assert_eq!(weights.get(Phase::Act), 0.25);
        assert_eq!(weights.get(Phase::Reflect), 0.10);
    }

    #[test]
    fn test_muls_defaults() {
        let config = MulsConfig::default();
        assert_eq!(config.learning_rate, 0.1);
        assert_eq!(config.promote_q_threshold, 0.7);
        assert_eq!(config.promote_success_count, 3);
        assert_eq!(config.demote_q_threshold, 0.3);
        assert_eq!(config.demote_failure_count, 5);
    }

    #[test]
    fn test_builder_clamps() {
        let config = MulsConfig::new()
            .with_learning_rate(5.0)
            .with_promotion(1.5, 2);
        assert_eq!(config.learning_rate, 1.0);
        assert_eq!(config.promote_q_threshold, 1.0);
    }

    #[test]
    fn test_retrieval_config_serialization() {
        let config = RetrievalConfig::new().with_top_k(50).with_normalize_q(true);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RetrievalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
