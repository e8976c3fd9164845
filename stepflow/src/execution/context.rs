//! Per-execution context handed to the step executor.

use super::logs::{resolve_log_dir, DEFAULT_MAX_OUTPUT_BYTES};
use crate::core::RunIdentity;
use crate::events::{EventSink, JsonlEventLog, NoOpEventSink};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default deadline of one step execution.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Everything one step execution needs besides its parameters.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Run the step belongs to.
    pub identity: RunIdentity,
    /// Step id.
    pub step_id: String,
    /// Step display name.
    pub step_name: String,
    /// Resolved log directory.
    pub log_dir: PathBuf,
    /// Deadline for the execution.
    pub timeout: Duration,
    /// Cap on in-memory stdout/stderr.
    pub max_output_bytes: usize,
    /// Run-level lifecycle event sink.
    pub events: Arc<dyn EventSink>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("identity", &self.identity)
            .field("step_id", &self.step_id)
            .field("step_name", &self.step_name)
            .field("log_dir", &self.log_dir)
            .field("timeout", &self.timeout)
            .field("max_output_bytes", &self.max_output_bytes)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Creates a context with default timeout and output cap, discarding
    /// lifecycle events.
    #[must_use]
    pub fn new(identity: RunIdentity, step_id: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        let step_id = step_id.into();
        Self {
            identity,
            step_name: step_id.clone(),
            step_id,
            log_dir: log_dir.into(),
            timeout: DEFAULT_STEP_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Resolves `log_dir` (with fallback) and appends events to its
    /// `events.jsonl`.
    #[must_use]
    pub fn with_jsonl_events(identity: RunIdentity, step_id: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        let dir = resolve_log_dir(&log_dir.into());
        let events: Arc<dyn EventSink> = Arc::new(JsonlEventLog::in_dir(&dir));
        Self::new(identity, step_id, dir).with_events(events)
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_step_name(mut self, name: impl Into<String>) -> Self {
        self.step_name = name.into();
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the in-memory output cap.
    #[must_use]
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}
