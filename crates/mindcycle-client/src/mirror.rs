// The phase mirror
//
// Tracks the server-announced phase for the client's active loop.
// Events for other loops cause no state change; duplicate deliveries
// (same correlation id) are ignored per the at-least-once contract.

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use mindcycle_contracts::{CorrelationWindow, EventEnvelope, EventPayload, Phase};

use crate::templates;

/// Mirror configuration
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Correlation ids remembered for duplicate suppression
    pub dedupe_capacity: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            dedupe_capacity: 1024,
        }
    }
}

struct MirrorState {
    active_loop_id: Option<Uuid>,
    current_phase: Option<Phase>,
    dedupe: CorrelationWindow,
}

/// Client-side view of the active loop's phase
pub struct PhaseMirror {
    state: Mutex<MirrorState>,
}

impl PhaseMirror {
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            state: Mutex::new(MirrorState {
                active_loop_id: None,
                current_phase: None,
                dedupe: CorrelationWindow::new(config.dedupe_capacity),
            }),
        }
    }

    /// Bind the mirror to a loop; resets the tracked phase
    pub fn set_active_loop(&self, loop_id: Option<Uuid>) {
        let mut state = self.state.lock();
        state.active_loop_id = loop_id;
        state.current_phase = None;
    }

    pub fn active_loop_id(&self) -> Option<Uuid> {
        self.state.lock().active_loop_id
    }

    /// The mirrored phase, None outside an active cycle
    pub fn current_phase(&self) -> Option<Phase> {
        self.state.lock().current_phase
    }

    /// Feed one delivered envelope into the mirror
    ///
    /// Returns true when the envelope changed mirror state.
    pub fn handle_event(&self, envelope: &EventEnvelope) -> bool {
        let mut state = self.state.lock();

        if !state.dedupe.observe(envelope) {
            debug!(correlation_id = ?envelope.correlation_id, "duplicate envelope ignored");
            return false;
        }

        // Loop isolation: events for other loops cause no mutation
        let Some(active) = state.active_loop_id else {
            return false;
        };
        if envelope.loop_id() != Some(active) {
            return false;
        }

        let next_phase = match &envelope.payload {
            // The five canonical phase events
            EventPayload::Observation { .. } => Some(Phase::Observe),
            EventPayload::Reasoning { .. } => Some(Phase::Reason),
            EventPayload::Plan { .. } => Some(Phase::Plan),
            EventPayload::Action { .. } | EventPayload::Execution { .. } => Some(Phase::Act),
            EventPayload::Reflection { .. } => Some(Phase::Reflect),
            // Hints may carry an explicit phase in metadata
            EventPayload::Hint { metadata, .. } => metadata.orpar_phase(),
            // Lifecycle
            EventPayload::Started { .. } => Some(Phase::Observe),
            EventPayload::Stopped { .. } => {
                state.current_phase = None;
                return true;
            }
            EventPayload::Initialize { .. } | EventPayload::PhaseViolation { .. } => None,
        };

        match next_phase {
            Some(phase) if state.current_phase != Some(phase) => {
                debug!(loop_id = %active, phase = %phase, "mirrored phase update");
                state.current_phase = Some(phase);
                true
            }
            _ => false,
        }
    }

    /// Substitute the phase templates using the mirrored phase
    pub fn render(&self, template: &str) -> String {
        templates::render(template, self.current_phase())
    }
}

impl Default for PhaseMirror {
    fn default() -> Self {
        Self::new(MirrorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindcycle_contracts::{
        LoopStatus, MetadataMap, Observation, Plan, PlannedAction, Reasoning,
    };
    use serde_json::json;

    fn mirror_bound_to(loop_id: Uuid) -> PhaseMirror {
        let mirror = PhaseMirror::default();
        mirror.set_active_loop(Some(loop_id));
        mirror
    }

    fn envelope(payload: EventPayload) -> EventEnvelope {
        EventEnvelope::new(Uuid::now_v7(), Uuid::now_v7(), payload)
    }

    fn observation_event(loop_id: Uuid) -> EventEnvelope {
        envelope(EventPayload::Observation {
            loop_id,
            observation: Observation::external(Uuid::now_v7(), json!("x")),
        })
    }

    #[test]
    fn test_phase_tracking_through_cycle() {
        let loop_id = Uuid::now_v7();
        let mirror = mirror_bound_to(loop_id);

        mirror.handle_event(&observation_event(loop_id));
        assert_eq!(mirror.current_phase(), Some(Phase::Observe));

        mirror.handle_event(&envelope(EventPayload::Reasoning {
            loop_id,
            reasoning: Reasoning::new(loop_id, "r", 0.5),
        }));
        assert_eq!(mirror.current_phase(), Some(Phase::Reason));

        mirror.handle_event(&envelope(EventPayload::Plan {
            loop_id,
            plan: Plan::new(Uuid::now_v7(), "g", vec![PlannedAction::step("a")]),
        }));
        assert_eq!(mirror.current_phase(), Some(Phase::Plan));

        mirror.handle_event(&envelope(EventPayload::Reflection {
            loop_id,
            context: MetadataMap::new(),
        }));
        assert_eq!(mirror.current_phase(), Some(Phase::Reflect));
    }

    #[test]
    fn test_loop_isolation() {
        let mine = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mirror = mirror_bound_to(mine);

        // Event for a different loop causes no mutation
        let changed = mirror.handle_event(&observation_event(other));
        assert!(!changed);
        assert_eq!(mirror.current_phase(), None);
    }

    #[test]
    fn test_duplicate_delivery_idempotent() {
        let loop_id = Uuid::now_v7();
        let mirror = mirror_bound_to(loop_id);

        let event = observation_event(loop_id);
        assert!(mirror.handle_event(&event));
        let phase_after_first = mirror.current_phase();

        // Redelivery with the same correlation id changes nothing
        assert!(!mirror.handle_event(&event));
        assert_eq!(mirror.current_phase(), phase_after_first);
    }

    #[test]
    fn test_hint_metadata_phase() {
        let loop_id = Uuid::now_v7();
        let mirror = mirror_bound_to(loop_id);

        mirror.handle_event(&envelope(EventPayload::Hint {
            loop_id: Some(loop_id),
            hint: "stay sharp".into(),
            metadata: MetadataMap::new().with_orpar_phase(Phase::Act),
        }));
        assert_eq!(mirror.current_phase(), Some(Phase::Act));
    }

    #[test]
    fn test_stop_clears_phase() {
        let loop_id = Uuid::now_v7();
        let mirror = mirror_bound_to(loop_id);
        mirror.handle_event(&observation_event(loop_id));
        assert!(mirror.current_phase().is_some());

        mirror.handle_event(&envelope(EventPayload::Stopped {
            loop_id,
            status: LoopStatus::Stopping,
            context: MetadataMap::new().with_reason("done"),
        }));
        assert_eq!(mirror.current_phase(), None);
        assert_eq!(mirror.render("{{CURRENT_ORPAR_PHASE}}"), "(Not in active cycle)");
    }

    #[test]
    fn test_render_uses_mirrored_phase() {
        let loop_id = Uuid::now_v7();
        let mirror = mirror_bound_to(loop_id);
        mirror.handle_event(&observation_event(loop_id));

        let rendered = mirror.render("phase={{CURRENT_ORPAR_PHASE}}");
        assert_eq!(rendered, "phase=Observe");
    }

    #[test]
    fn test_unbound_mirror_ignores_everything() {
        let mirror = PhaseMirror::default();
        let changed = mirror.handle_event(&observation_event(Uuid::now_v7()));
        assert!(!changed);
        assert_eq!(mirror.current_phase(), None);
    }
}
