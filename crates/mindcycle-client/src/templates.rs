// Prompt template substitution

use mindcycle_contracts::Phase;

use crate::guidance::phase_guidance;

/// Replaced with the current phase name
pub const TEMPLATE_PHASE: &str = "{{CURRENT_ORPAR_PHASE}}";
/// Replaced with the phase-specific behavioral guidance
pub const TEMPLATE_PHASE_GUIDANCE: &str = "{{CURRENT_ORPAR_PHASE_GUIDANCE}}";
/// Rendered for the phase template when no cycle is active
pub const NOT_IN_CYCLE: &str = "(Not in active cycle)";

/// Substitute the phase templates in a prompt
pub fn render(template: &str, phase: Option<Phase>) -> String {
    let phase_name = phase.map(|p| p.display_name()).unwrap_or(NOT_IN_CYCLE);
    template
        .replace(TEMPLATE_PHASE, phase_name)
        .replace(TEMPLATE_PHASE_GUIDANCE, phase_guidance(phase))
}
