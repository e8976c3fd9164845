//! Error types for the stepflow orchestrator.
//!
//! Errors are split by the phase that raises them: plan loading and
//! validation happen before anything runs, execution errors describe a single
//! step that could not be observed to completion, and pipeline errors are the
//! scheduler's reasons for halting a run.

use crate::core::{PipelineResult, StepRunResult};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for stepflow operations.
#[derive(Debug, Error)]
pub enum StepflowError {
    /// The plan document could not be read or parsed.
    #[error("{0}")]
    PlanLoad(#[from] PlanLoadError),

    /// The plan failed static validation.
    #[error("{0}")]
    Validation(#[from] PlanValidationError),

    /// A step execution could not be observed to completion.
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// The pipeline halted.
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// The checkpoint store failed.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised while reading a plan document.
#[derive(Debug, Error)]
pub enum PlanLoadError {
    /// The plan file could not be read.
    #[error("unable to read plan file {path}: {source}")]
    Read {
        /// Path of the plan file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The plan document is not valid YAML/JSON for the plan schema.
    #[error("unable to parse plan: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Error raised when a plan fails static validation.
///
/// Each variant corresponds to one class of check; all of them are fatal
/// before any step executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    /// The plan has no steps.
    #[error("plan must have at least one step")]
    EmptyPlan,

    /// A step has an empty identifier.
    #[error("step {index} is missing id")]
    MissingIdentifier {
        /// Zero-based position of the step in the plan.
        index: usize,
    },

    /// Two steps share an identifier.
    #[error("duplicate step id: {id}")]
    DuplicateIdentifier {
        /// The repeated identifier.
        id: String,
    },

    /// A step has no type tag.
    #[error("step {id} is missing type")]
    MissingType {
        /// The step identifier.
        id: String,
    },

    /// A step has a type tag outside the supported set.
    #[error("step {id} has unsupported type {step_type}")]
    UnsupportedType {
        /// The step identifier.
        id: String,
        /// The unrecognized tag.
        step_type: String,
    },

    /// A type-specific required field is absent or empty.
    #[error("step {id} is missing required field {field}")]
    MissingRequiredField {
        /// The step identifier.
        id: String,
        /// Dotted path of the missing field (e.g. `download.url`).
        field: String,
    },

    /// A dependency references a step that is not in the plan.
    #[error("step {id} depends on unknown step {dependency}")]
    UnknownDependency {
        /// The step identifier.
        id: String,
        /// The unknown dependency.
        dependency: String,
    },

    /// A `when` clause is malformed.
    #[error("step {id} has invalid when condition")]
    InvalidCondition {
        /// The step identifier.
        id: String,
    },

    /// A `when` clause references a step that is not in the plan.
    #[error("step {id} when references unknown step {target}")]
    UnknownConditionTarget {
        /// The step identifier.
        id: String,
        /// The unknown target.
        target: String,
    },
}

impl PlanValidationError {
    /// Returns a stable machine-readable code for this error class.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyPlan => "PLAN-EMPTY",
            Self::MissingIdentifier { .. } => "PLAN-MISSING-ID",
            Self::DuplicateIdentifier { .. } => "PLAN-DUPLICATE-ID",
            Self::MissingType { .. } => "PLAN-MISSING-TYPE",
            Self::UnsupportedType { .. } => "PLAN-UNSUPPORTED-TYPE",
            Self::MissingRequiredField { .. } => "PLAN-MISSING-FIELD",
            Self::UnknownDependency { .. } => "PLAN-UNKNOWN-DEPENDENCY",
            Self::InvalidCondition { .. } => "PLAN-INVALID-CONDITION",
            Self::UnknownConditionTarget { .. } => "PLAN-UNKNOWN-CONDITION-TARGET",
        }
    }

    /// Returns the step identifier the error refers to, if any.
    #[must_use]
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::EmptyPlan | Self::MissingIdentifier { .. } => None,
            Self::DuplicateIdentifier { id }
            | Self::MissingType { id }
            | Self::UnsupportedType { id, .. }
            | Self::MissingRequiredField { id, .. }
            | Self::UnknownDependency { id, .. }
            | Self::InvalidCondition { id }
            | Self::UnknownConditionTarget { id, .. } => Some(id),
        }
    }
}

/// A step execution could not be observed to completion.
///
/// A process that runs and exits nonzero is *not* an execution error; it is
/// a normal result the scheduler inspects.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The step parameters are unusable (e.g. an empty command).
    #[error("{0}")]
    InvalidInput(String),

    /// The external process could not be started.
    #[error("failed to start {command}: {source}")]
    Spawn {
        /// The program that failed to start.
        command: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Reading output or writing a file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP request failed before a response was received.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The HTTP response had a non-2xx status.
    #[error("unexpected status code {0}")]
    HttpStatus(u16),

    /// The execution exceeded its deadline and was cancelled.
    #[error("step timed out after {}s", timeout.as_secs_f64())]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The downloaded content does not match the expected digest.
    #[error("sha256 mismatch: expected {expected} got {actual}")]
    DigestMismatch {
        /// The digest from the plan.
        expected: String,
        /// The digest of the written file.
        actual: String,
    },

    /// The task running the execution panicked or was aborted.
    #[error("step execution aborted: {0}")]
    Panicked(String),
}

impl ExecutionError {
    /// Returns true if retrying the execution could plausibly succeed.
    ///
    /// Bad input, digest mismatches and panics are deterministic and are
    /// never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidInput(_) | Self::DigestMismatch { .. } | Self::Panicked(_)
        )
    }

    /// Returns true if this error is a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Exit code recorded for an execution that ended with this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        -1
    }
}

/// A failed execution together with whatever it captured before failing.
///
/// The result carries the error text and exit code `-1`, plus any output and
/// log paths recorded up to the failure.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    /// Why the execution failed.
    #[source]
    pub error: ExecutionError,
    /// The partial result.
    pub result: StepRunResult,
}

impl ExecutionFailure {
    /// Creates a failure, stamping the error into the result.
    #[must_use]
    pub fn new(error: ExecutionError, result: StepRunResult) -> Self {
        let result = result.with_error(error.to_string());
        Self { error, result }
    }

    /// Creates a failure for an execution that never started.
    #[must_use]
    pub fn before_start(error: ExecutionError, name: impl Into<String>) -> Self {
        Self::new(
            error,
            StepRunResult {
                name: name.into(),
                ..Default::default()
            },
        )
    }
}

/// Reasons the scheduler halts a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No pending step can make progress.
    #[error("pipeline deadlock: check dependencies and conditions (pending: {})", pending.join(", "))]
    Deadlock {
        /// Steps that were still pending, in plan order.
        pending: Vec<String>,
    },

    /// A step that does not tolerate failure exited nonzero.
    #[error("step {id} returned non-zero exit code {exit_code}")]
    StepFailed {
        /// The failed step.
        id: String,
        /// Its exit code.
        exit_code: i32,
    },

    /// A step that does not tolerate failure could not be executed.
    #[error("step {id} failed: {source}")]
    Execution {
        /// The failed step.
        id: String,
        /// The execution error.
        #[source]
        source: ExecutionError,
    },

    /// The run was already halted in an earlier attempt.
    #[error("pipeline previously halted: {reason}")]
    PreviouslyHalted {
        /// The recorded halt reason.
        reason: String,
    },

    /// The run's checkpoint could not be loaded.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),
}

/// A halted pipeline: the reason plus every outcome computed before the halt.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PipelineHalt {
    /// Why the pipeline halted.
    #[source]
    pub error: PipelineError,
    /// Outcomes recorded before the halt, in plan order.
    pub result: PipelineResult,
}

impl PipelineHalt {
    /// Creates a new halt record.
    #[must_use]
    pub fn new(error: PipelineError, result: PipelineResult) -> Self {
        Self { error, result }
    }
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Reading or writing the checkpoint failed.
    #[error("checkpoint IO error at {path}: {source}")]
    Io {
        /// The checkpoint file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint could not be (de)serialized.
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
