//! Run identity for correlating logs, events and checkpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one pipeline run.
///
/// The workflow id is chosen by the caller and names the run durably (it keys
/// checkpoints and log prefixes). The run id distinguishes attempts that reuse
/// a workflow id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Caller-chosen workflow identifier.
    pub workflow_id: String,
    /// Identifier of this particular run.
    pub run_id: String,
}

impl RunIdentity {
    /// Creates an identity with a freshly generated run id.
    #[must_use]
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Sets an explicit run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}
