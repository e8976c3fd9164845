//! Assertions over pipeline results.

use crate::core::{PipelineResult, StepState};

/// Asserts the outcome ids and states, in order.
pub fn assert_states(result: &PipelineResult, expected: &[(&str, StepState)]) {
    let actual: Vec<(&str, StepState)> = result
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.state))
        .collect();
    assert_eq!(actual, expected, "Unexpected step outcomes");
}

/// Asserts that `step_id` was skipped with a reason containing `fragment`.
pub fn assert_skipped_because(result: &PipelineResult, step_id: &str, fragment: &str) {
    let outcome = result
        .step(step_id)
        .unwrap_or_else(|| panic!("Expected an outcome for step '{step_id}'"));
    assert_eq!(outcome.state, StepState::Skipped, "Step '{step_id}' was not skipped");
    let reason = outcome.skip_reason.as_deref().unwrap_or_default();
    assert!(
        reason.contains(fragment),
        "Expected skip reason of '{step_id}' to contain '{fragment}', got '{reason}'"
    );
}

/// Asserts that `step_id` never produced an outcome.
pub fn assert_absent(result: &PipelineResult, step_id: &str) {
    assert!(
        result.step(step_id).is_none(),
        "Expected no outcome for step '{step_id}'"
    );
}
