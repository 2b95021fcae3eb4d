// Per-phase behavioral guidance for prompt assembly

use mindcycle_contracts::Phase;

/// Guidance string substituted for the phase-guidance template
pub fn phase_guidance(phase: Option<Phase>) -> &'static str {
    match phase {
        Some(Phase::Observe) => {
            "Gather and report raw observations. Do not analyze, plan, or act yet."
        }
        Some(Phase::Reason) => {
            "Analyze the recorded observations. Identify causes and implications; \
             do not execute tools."
        }
        Some(Phase::Plan) => {
            "Turn the analysis into a concrete plan of discrete actions with tools \
             and parameters. Do not execute yet."
        }
        Some(Phase::Act) => {
            "Execute the bound plan's actions in order. Report each result; do not \
             re-plan mid-execution."
        }
        Some(Phase::Reflect) => {
            "Evaluate the completed cycle. Summarize what worked, what failed, and \
             what to do differently."
        }
        None => "No cognitive cycle is active. Await the next loop start.",
    }
}
