// Memory Utility Learning System
//
// Rewards from reflection reach memory items as an EMA on their Q-value,
// attenuated by the phase the item was touched in. Cycle completion then
// consolidates: well-performing items climb to longer-lived strata,
// persistently useless ones sink and eventually fall out of the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use mindcycle_contracts::{LearningSignals, Phase};

use crate::config::MulsConfig;
use crate::error::{MemoryError, Result};
use crate::item::MemoryStratum;
use crate::store::MemoryStore;

/// The Q-value EMA update rule
///
/// `q1 = clamp(q0 + alpha * (r - q0), 0, 1)`
pub fn q_update(q: f64, reward: f64, alpha: f64) -> f64 {
    (q + alpha * (reward - q)).clamp(0.0, 1.0)
}

/// Records which memory items were touched in which phase of a cycle
///
/// The loop engine owns one tracker per cycle and hands it to the MULS
/// engine when reflection completes.
#[derive(Debug, Default, Clone)]
pub struct CycleTracker {
    touched: HashMap<Phase, HashSet<Uuid>>,
}

impl CycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `memory_id` was used during `phase`
    pub fn touch(&mut self, phase: Phase, memory_id: Uuid) {
        self.touched.entry(phase).or_default().insert(memory_id);
    }

    /// Items touched in a specific phase
    pub fn touched_in(&self, phase: Phase) -> impl Iterator<Item = Uuid> + '_ {
        self.touched
            .get(&phase)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Every distinct item touched this cycle
    pub fn all_items(&self) -> HashSet<Uuid> {
        self.touched.values().flatten().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.touched.values().all(|s| s.is_empty())
    }

    /// Reset for the next cycle
    pub fn clear(&mut self) {
        self.touched.clear();
    }
}

/// What consolidation decided for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationOutcome {
    Promoted {
        memory_id: Uuid,
        from: MemoryStratum,
        to: MemoryStratum,
    },
    Demoted {
        memory_id: Uuid,
        from: MemoryStratum,
        to: MemoryStratum,
    },
    /// Demoted past the Working floor; dropped from the active store
    Archived { memory_id: Uuid },
    Unchanged { memory_id: Uuid },
}

/// The MULS engine: reward attribution and consolidation
pub struct MulsEngine {
    store: Arc<dyn MemoryStore>,
    config: MulsConfig,
}

impl MulsEngine {
    pub fn new(store: Arc<dyn MemoryStore>, config: MulsConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MulsConfig {
        &self.config
    }

    /// Attribute a reflection's reward across the items touched this cycle
    ///
    /// Each item touched in phase `p` receives
    /// `reward * phase_weight(p) * confidence`. Items that disappeared
    /// since they were touched (TTL sweep, manual removal) are skipped.
    /// Returns the number of items updated.
    pub async fn apply_reflection(
        &self,
        signals: &LearningSignals,
        tracker: &CycleTracker,
    ) -> Result<usize> {
        let mut updated = 0;
        let success = signals.reward > 0.0;

        for phase in Phase::ALL {
            let weight = self.config.phase_weights.get(phase);
            for memory_id in tracker.touched_in(phase) {
                let effective = signals.reward * weight * signals.confidence_for(memory_id);
                match self
                    .store
                    .apply_reward(memory_id, effective, self.config.learning_rate)
                    .await
                {
                    Ok(q) => {
                        self.store.record_outcome(memory_id, success).await?;
                        debug!(
                            memory_id = %memory_id,
                            phase = %phase,
                            effective_reward = effective,
                            q_value = q,
                            "attributed reward"
                        );
                        updated += 1;
                    }
                    Err(MemoryError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(updated)
    }

    /// Consolidate the cycle's touched items across strata
    pub async fn consolidate(&self, tracker: &CycleTracker) -> Result<Vec<ConsolidationOutcome>> {
        let mut outcomes = Vec::new();

        for memory_id in tracker.all_items() {
            let Some(item) = self.store.get(memory_id).await? else {
                continue;
            };

            let promote = item.q_value >= self.config.promote_q_threshold
                && item.success_count >= self.config.promote_success_count;
            let demote = item.q_value <= self.config.demote_q_threshold
                && item.failure_count >= self.config.demote_failure_count;

            let outcome = if promote {
                match item.stratum.promoted() {
                    Some(to) => {
                        self.store.set_stratum(memory_id, to).await?;
                        info!(memory_id = %memory_id, from = %item.stratum, to = %to, "promoted memory item");
                        ConsolidationOutcome::Promoted {
                            memory_id,
                            from: item.stratum,
                            to,
                        }
                    }
                    None => ConsolidationOutcome::Unchanged { memory_id },
                }
            } else if demote {
                match item.stratum.demoted() {
                    Some(to) => {
                        self.store.set_stratum(memory_id, to).await?;
                        info!(memory_id = %memory_id, from = %item.stratum, to = %to, "demoted memory item");
                        ConsolidationOutcome::Demoted {
                            memory_id,
                            from: item.stratum,
                            to,
                        }
                    }
                    None => {
                        self.store.remove(memory_id).await?;
                        info!(memory_id = %memory_id, "archived memory item");
                        ConsolidationOutcome::Archived { memory_id }
                    }
                }
            } else {
                ConsolidationOutcome::Unchanged { memory_id }
            };

            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Full cycle-completion path: attribute rewards, consolidate, sweep TTLs
    pub async fn complete_cycle(
        &self,
        signals: &LearningSignals,
        tracker: &CycleTracker,
    ) -> Result<Vec<ConsolidationOutcome>> {
        self.apply_reflection(signals, tracker).await?;
        let outcomes = self.consolidate(tracker).await?;
        self.store.sweep_expired().await?;
        Ok(outcomes)
    }
}
