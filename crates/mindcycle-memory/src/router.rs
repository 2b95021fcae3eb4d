// Phase-strata router
//
// Pure mapping from the loop's current phase to the strata worth
// searching and the lambda blending weight. The hot retrieval path always
// goes through here; overrides come from deployment configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use mindcycle_contracts::Phase;

use crate::item::MemoryStratum;

/// Where to look and how much utility matters there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub strata: Vec<MemoryStratum>,
    /// Utility/similarity blending weight in [0, 1]
    pub lambda: f64,
}

impl RoutePlan {
    pub fn new(strata: Vec<MemoryStratum>, lambda: f64) -> Self {
        Self {
            strata,
            lambda: lambda.clamp(0.0, 1.0),
        }
    }
}

/// Maps the current phase to a retrieval route
#[derive(Debug, Clone, Default)]
pub struct StrataRouter {
    overrides: HashMap<Phase, RoutePlan>,
    fallback_override: Option<RoutePlan>,
}

impl StrataRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the route for one phase
    pub fn with_override(mut self, phase: Phase, plan: RoutePlan) -> Self {
        self.overrides.insert(phase, plan);
        self
    }

    /// Override the route used when no loop phase is active
    pub fn with_fallback(mut self, plan: RoutePlan) -> Self {
        self.fallback_override = Some(plan);
        self
    }

    /// The built-in route table
    pub fn default_for(phase: Phase) -> RoutePlan {
        use MemoryStratum::*;
        match phase {
            Phase::Observe => RoutePlan::new(vec![Working, ShortTerm], 0.2),
            Phase::Reason => RoutePlan::new(vec![Episodic, Semantic], 0.5),
            Phase::Plan => RoutePlan::new(vec![Semantic, LongTerm], 0.7),
            Phase::Act => RoutePlan::new(vec![Working, ShortTerm], 0.3),
            Phase::Reflect => RoutePlan::new(MemoryStratum::ALL.to_vec(), 0.6),
        }
    }

    /// The channel-wide default used outside an active cycle
    pub fn default_fallback() -> RoutePlan {
        RoutePlan::new(vec![MemoryStratum::Episodic, MemoryStratum::ShortTerm], 0.5)
    }

    /// Route a phase (or the null phase) to strata and lambda
    pub fn route(&self, phase: Option<Phase>) -> RoutePlan {
        match phase {
            Some(p) => self
                .overrides
                .get(&p)
                .cloned()
                .unwrap_or_else(|| Self::default_for(p)),
            None => self
                .fallback_override
                .clone()
                .unwrap_or_else(Self::default_fallback),
        }
    }
}
