//! Step results, step outcomes and the aggregated pipeline result.

use super::StepState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// What one step execution observed.
///
/// A nonzero `exit_code` with no `error` means the action ran to completion
/// and reported failure. An `error` means it could not be observed to
/// completion; the exit code is then `-1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRunResult {
    /// Resolved step name.
    pub name: String,
    /// Process exit code, passed through verbatim.
    pub exit_code: i32,
    /// Captured stdout, capped at the configured byte limit.
    #[serde(default)]
    pub stdout: String,
    /// Captured stderr, capped at the configured byte limit.
    #[serde(default)]
    pub stderr: String,
    /// Whether `stdout` was cut at the limit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stdout_truncated: bool,
    /// Whether `stderr` was cut at the limit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stderr_truncated: bool,
    /// Full raw stdout log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
    /// Full raw stderr log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
    /// Structured per-line JSONL log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_path: Option<PathBuf>,
    /// Wall-clock duration in seconds.
    pub duration_secs: f64,
    /// Error text when the execution itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRunResult {
    /// Returns true if the execution completed with exit code zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    /// Sets the error text and the matching exit code.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.exit_code = -1;
        self
    }
}

/// The finalized record of one step in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Step identifier.
    pub id: String,
    /// Resolved step name.
    pub name: String,
    /// Terminal state.
    pub state: StepState,
    /// Why the step was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// The execution result, absent for skipped steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepRunResult>,
}

impl StepOutcome {
    /// Creates a skipped outcome.
    #[must_use]
    pub fn skipped(id: impl Into<String>, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: StepState::Skipped,
            skip_reason: Some(reason.into()),
            result: None,
        }
    }

    /// Creates an outcome from an observed result: success on exit code zero,
    /// failed otherwise.
    #[must_use]
    pub fn completed(id: impl Into<String>, result: StepRunResult) -> Self {
        let state = if result.succeeded() {
            StepState::Success
        } else {
            StepState::Failed
        };
        Self {
            id: id.into(),
            name: result.name.clone(),
            state,
            skip_reason: None,
            result: Some(result),
        }
    }

    /// Creates a failed outcome for an execution that errored.
    #[must_use]
    pub fn errored(id: impl Into<String>, result: StepRunResult) -> Self {
        Self {
            id: id.into(),
            name: result.name.clone(),
            state: StepState::Failed,
            skip_reason: None,
            result: Some(result),
        }
    }

    /// Exit code of the execution, if it ran.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.result.as_ref().map(|r| r.exit_code)
    }
}

/// The outcome of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// True only if no outcome is failed.
    pub success: bool,
    /// Outcomes in plan order.
    pub steps: Vec<StepOutcome>,
}

impl PipelineResult {
    /// Builds a result from outcomes already in plan order.
    #[must_use]
    pub fn from_outcomes(steps: Vec<StepOutcome>) -> Self {
        let success = steps.iter().all(|s| !s.state.is_failure());
        Self { success, steps }
    }

    /// Builds the partial result of a halted run. A halted run never
    /// succeeded, whatever its finalized outcomes say.
    #[must_use]
    pub fn halted(steps: Vec<StepOutcome>) -> Self {
        Self { success: false, steps }
    }

    /// Looks up an outcome by step id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Orders outcomes by declared order.
///
/// Ids present in `order` come first in that order; ids missing from
/// `order` follow in lexicographic order.
#[must_use]
pub fn order_outcomes(outcomes: &HashMap<String, StepOutcome>, order: &[String]) -> Vec<StepOutcome> {
    let mut ordered = Vec::with_capacity(outcomes.len());
    for id in order {
        if let Some(outcome) = outcomes.get(id) {
            ordered.push(outcome.clone());
        }
    }

    let mut extra: Vec<&String> = outcomes.keys().filter(|id| !order.contains(id)).collect();
    extra.sort();
    ordered.extend(extra.into_iter().filter_map(|id| outcomes.get(id).cloned()));
    ordered
}
