// ORPAR phases and lifecycle status enums
//
// Phase ordering is the heart of the coordination core: the loop engine
// only advances through the closure of
// Observe -> Reason -> Plan -> Act* -> Reflect -> Observe ...

use serde::{Deserialize, Serialize};

/// The five phases of the cognitive cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Observe,
    Reason,
    Plan,
    Act,
    Reflect,
}

impl Phase {
    /// All phases in cycle order
    pub const ALL: [Phase; 5] = [
        Phase::Observe,
        Phase::Reason,
        Phase::Plan,
        Phase::Act,
        Phase::Reflect,
    ];

    /// Wire name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Observe => "observe",
            Phase::Reason => "reason",
            Phase::Plan => "plan",
            Phase::Act => "act",
            Phase::Reflect => "reflect",
        }
    }

    /// Human-facing name (capitalized, used in prompt templates)
    pub fn display_name(&self) -> &'static str {
        match self {
            Phase::Observe => "Observe",
            Phase::Reason => "Reason",
            Phase::Plan => "Plan",
            Phase::Act => "Act",
            Phase::Reflect => "Reflect",
        }
    }

    /// The phase that follows this one in the cycle (Reflect wraps to Observe)
    pub fn next(&self) -> Phase {
        match self {
            Phase::Observe => Phase::Reason,
            Phase::Reason => Phase::Plan,
            Phase::Plan => Phase::Act,
            Phase::Act => Phase::Reflect,
            Phase::Reflect => Phase::Observe,
        }
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> Option<Phase> {
        match s {
            "observe" => Some(Phase::Observe),
            "reason" => Some(Phase::Reason),
            "plan" => Some(Phase::Plan),
            "act" => Some(Phase::Act),
            "reflect" => Some(Phase::Reflect),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A small set of phases, used for per-tool phase gating
///
/// Stored as a bitmask internally; serialized as a list of phase names so
/// tool descriptors stay readable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseSet(u8);

impl PhaseSet {
    /// The empty set (no phase admits the tool)
    pub const EMPTY: PhaseSet = PhaseSet(0);

    fn bit(phase: Phase) -> u8 {
        match phase {
            Phase::Observe => 1 << 0,
            Phase::Reason => 1 << 1,
            Phase::Plan => 1 << 2,
            Phase::Act => 1 << 3,
            Phase::Reflect => 1 << 4,
        }
    }

    /// Set containing every phase
    pub fn all() -> PhaseSet {
        PhaseSet(0b1_1111)
    }

    /// Set containing exactly one phase
    pub fn only(phase: Phase) -> PhaseSet {
        PhaseSet(Self::bit(phase))
    }

    /// Set built from a slice of phases
    pub fn of(phases: &[Phase]) -> PhaseSet {
        let mut set = PhaseSet::EMPTY;
        for p in phases {
            set = set.with(*p);
        }
        set
    }

    /// Return a copy with `phase` added
    pub fn with(self, phase: Phase) -> PhaseSet {
        PhaseSet(self.0 | Self::bit(phase))
    }

    /// Whether `phase` is in the set
    pub fn contains(&self, phase: Phase) -> bool {
        self.0 & Self::bit(phase) != 0
    }

    /// Number of phases in the set
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate phases in cycle order
    pub fn iter(&self) -> impl Iterator<Item = Phase> + '_ {
        Phase::ALL.iter().copied().filter(|p| self.contains(*p))
    }
}

impl Serialize for PhaseSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let phases: Vec<Phase> = self.iter().collect();
        phases.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PhaseSet {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let phases = Vec::<Phase>::deserialize(deserializer)?;
        Ok(PhaseSet::of(&phases))
    }
}

impl FromIterator<Phase> for PhaseSet {
    fn from_iter<I: IntoIterator<Item = Phase>>(iter: I) -> Self {
        let mut set = PhaseSet::EMPTY;
        for p in iter {
            set = set.with(p);
        }
        set
    }
}

/// Lifecycle status of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl LoopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Initializing => "initializing",
            LoopStatus::Starting => "starting",
            LoopStatus::Running => "running",
            LoopStatus::Stopping => "stopping",
            LoopStatus::Stopped => "stopped",
        }
    }

    /// Whether the loop can still process work
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LoopStatus::Initializing | LoopStatus::Starting | LoopStatus::Running
        )
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a planned action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl ActionStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Skipped
        )
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionStatus::Pending => "pending",
            ActionStatus::InProgress => "in_progress",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}
