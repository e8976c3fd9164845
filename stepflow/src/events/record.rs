//! Lifecycle event records written to `events.jsonl`.

use crate::core::{RunIdentity, StepRunResult};
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle status tag of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The step execution began.
    StepStarted,
    /// The step execution ended, successfully or not.
    StepFinished,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepStarted => write!(f, "step_started"),
            Self::StepFinished => write!(f, "step_finished"),
        }
    }
}

/// One lifecycle event of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// When the event was recorded.
    pub timestamp: String,
    /// Workflow id of the run.
    pub workflow_id: String,
    /// Run id of the run.
    pub run_id: String,
    /// Step id.
    pub step_id: String,
    /// Step name.
    #[serde(default)]
    pub step_name: String,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Exit code, on finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Duration in seconds, on finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Raw stdout log, on finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
    /// Raw stderr log, on finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
    /// Structured log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_path: Option<PathBuf>,
    /// Free-form message; the command line on start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error text when the execution failed to complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LifecycleEvent {
    /// Creates a start event.
    #[must_use]
    pub fn started(
        identity: &RunIdentity,
        step_id: &str,
        step_name: &str,
        structured_path: Option<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: iso_timestamp(),
            workflow_id: identity.workflow_id.clone(),
            run_id: identity.run_id.clone(),
            step_id: step_id.to_string(),
            step_name: step_name.to_string(),
            status: EventStatus::StepStarted,
            exit_code: None,
            duration_secs: None,
            stdout_path: None,
            stderr_path: None,
            structured_path,
            message: Some(message.into()),
            error: None,
        }
    }

    /// Creates a finish event from the final result.
    #[must_use]
    pub fn finished(identity: &RunIdentity, step_id: &str, result: &StepRunResult) -> Self {
        Self {
            timestamp: iso_timestamp(),
            workflow_id: identity.workflow_id.clone(),
            run_id: identity.run_id.clone(),
            step_id: step_id.to_string(),
            step_name: result.name.clone(),
            status: EventStatus::StepFinished,
            exit_code: Some(result.exit_code),
            duration_secs: Some(result.duration_secs),
            stdout_path: result.stdout_path.clone(),
            stderr_path: result.stderr_path.clone(),
            structured_path: result.structured_path.clone(),
            message: None,
            error: result.error.clone(),
        }
    }

    /// Returns true if the event belongs to the given run.
    #[must_use]
    pub fn belongs_to(&self, workflow_id: &str, run_id: &str) -> bool {
        self.workflow_id == workflow_id && self.run_id == run_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_event_shape() {
        let identity = RunIdentity::new("wf").with_run_id("r1");
        let event = LifecycleEvent::started(&identity, "a", "Step A", None, "echo");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "step_started");
        assert_eq!(json["message"], "echo");
        assert_eq!(json["workflow_id"], "wf");
        assert!(json.get("exit_code").is_none());
    }

    #[test]
    fn test_finished_event_carries_result() {
        let identity = RunIdentity::new("wf").with_run_id("r1");
        let result = StepRunResult {
            name: "A".into(),
            exit_code: 3,
            duration_secs: 1.5,
            stdout_path: Some(PathBuf::from("/logs/a_stdout.log")),
            ..Default::default()
        };
        let event = LifecycleEvent::finished(&identity, "a", &result);
        assert_eq!(event.status, EventStatus::StepFinished);
        assert_eq!(event.exit_code, Some(3));
        assert_eq!(event.duration_secs, Some(1.5));
        assert!(event.belongs_to("wf", "r1"));
        assert!(!event.belongs_to("wf", "r2"));
    }
}
