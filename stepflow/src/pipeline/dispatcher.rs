//! The seam between the scheduler and step execution.
//!
//! The scheduler hands each runnable step to a [`StepDispatcher`] and only
//! ever sees the final result: retries happen beneath it.

use super::retry::{with_retry, RetryPolicy};
use crate::core::{RunIdentity, StepRunResult};
use crate::errors::ExecutionFailure;
use crate::events::{EventSink, JsonlEventLog};
use crate::execution::{resolve_log_dir, ExecutionContext, StepExecutor, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_STEP_TIMEOUT};
use crate::plan::Step;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Deadline and retry policy of one step execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityOptions {
    /// Deadline of each attempt.
    pub timeout: Duration,
    /// Retry policy across attempts.
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_STEP_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ActivityOptions {
    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Options for `step`: its timeout and retry overrides on top of these.
    #[must_use]
    pub fn for_step(&self, step: &Step) -> Self {
        let mut options = *self;
        if let Some(timeout) = step.timeout {
            options.timeout = timeout;
        }
        if let Some(overrides) = &step.retry {
            options.retry = options.retry.with_override(overrides);
        }
        options
    }
}

/// One step handed to a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Run the step belongs to.
    pub identity: RunIdentity,
    /// The validated step.
    pub step: Step,
    /// Requested log directory, before fallback resolution.
    pub log_dir: PathBuf,
    /// Effective options.
    pub options: ActivityOptions,
}

/// Executes one step to a final result.
///
/// `Ok` means the action was observed to completion, whatever its exit code.
/// `Err` means it could not be, after every permitted attempt.
#[async_trait]
pub trait StepDispatcher: Send + Sync {
    /// Dispatches one step.
    async fn dispatch(&self, request: DispatchRequest) -> Result<StepRunResult, ExecutionFailure>;
}

/// Runs steps in-process, retrying retryable execution errors.
pub struct LocalDispatcher {
    executor: StepExecutor,
    max_output_bytes: usize,
    event_sink: Option<Arc<dyn EventSink>>,
    logs: Mutex<HashMap<PathBuf, (PathBuf, Arc<dyn EventSink>)>>,
}

impl fmt::Debug for LocalDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDispatcher")
            .field("executor", &self.executor)
            .field("max_output_bytes", &self.max_output_bytes)
            .finish_non_exhaustive()
    }
}

impl Default for LocalDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDispatcher {
    /// Creates a dispatcher writing `events.jsonl` into each run's log
    /// directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            executor: StepExecutor::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            event_sink: None,
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the executor.
    #[must_use]
    pub fn with_executor(mut self, executor: StepExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the in-memory output cap.
    #[must_use]
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Sends lifecycle events to `sink` instead of the log directory.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Resolves a requested log directory once and shares its event log
    /// across every step of every run writing there.
    fn log_target(&self, requested: &Path) -> (PathBuf, Arc<dyn EventSink>) {
        let mut logs = self.logs.lock();
        if let Some((dir, sink)) = logs.get(requested) {
            return (dir.clone(), Arc::clone(sink));
        }
        let dir = resolve_log_dir(requested);
        let sink = self
            .event_sink
            .clone()
            .unwrap_or_else(|| Arc::new(JsonlEventLog::in_dir(&dir)));
        logs.insert(requested.to_path_buf(), (dir.clone(), Arc::clone(&sink)));
        (dir, sink)
    }
}

#[async_trait]
impl StepDispatcher for LocalDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<StepRunResult, ExecutionFailure> {
        let (log_dir, events) = self.log_target(&request.log_dir);
        let DispatchRequest {
            identity,
            step,
            options,
            ..
        } = request;

        let ctx = ExecutionContext::new(identity, step.id.clone(), log_dir)
            .with_step_name(step.name.clone())
            .with_timeout(options.timeout)
            .with_max_output_bytes(self.max_output_bytes)
            .with_events(events);

        let (ctx, executor, action) = (&ctx, &self.executor, &step.action);
        with_retry(
            &options.retry,
            &step.id,
            |failure: &ExecutionFailure| failure.error.is_retryable(),
            move |attempt| {
                debug!(step_id = %ctx.step_id, attempt, "Dispatching step");
                executor.execute(ctx, action)
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExecutionError;
    use crate::events::{CollectingEventSink, EventStatus, EVENTS_FILE_NAME};
    use crate::plan::{CommandSpec, RetryOverride};

    fn request(dir: &Path, step: Step, retry: RetryPolicy) -> DispatchRequest {
        DispatchRequest {
            identity: RunIdentity::new("wf").with_run_id("r"),
            options: ActivityOptions::default().with_retry(retry).for_step(&step),
            step,
            log_dir: dir.to_path_buf(),
        }
    }

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_initial_interval(Duration::from_millis(1))
    }

    fn sh(id: &str, script: &str) -> Step {
        Step::command(id, CommandSpec::new("sh").with_args(["-c", script]))
    }

    #[test]
    fn test_for_step_applies_overrides() {
        let step = sh("a", "true")
            .with_timeout(Duration::from_secs(9))
            .with_retry(RetryOverride {
                max_attempts: Some(1),
                ..Default::default()
            });
        let options = ActivityOptions::default().for_step(&step);
        assert_eq!(options.timeout, Duration::from_secs(9));
        assert_eq!(options.retry.max_attempts, 1);
        assert_eq!(options.retry.initial_interval, Duration::from_secs(5));

        let plain = ActivityOptions::default().for_step(&sh("b", "true"));
        assert_eq!(plain.timeout, DEFAULT_STEP_TIMEOUT);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let dispatcher = LocalDispatcher::new().with_event_sink(sink.clone());

        let result = dispatcher
            .dispatch(request(dir.path(), sh("a", "exit 3"), fast(3)))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried_until_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let dispatcher = LocalDispatcher::new().with_event_sink(sink.clone());
        let step = Step::command("missing", CommandSpec::new("/nonexistent/stepflow-binary"));

        let failure = dispatcher
            .dispatch(request(dir.path(), step, fast(2)))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ExecutionError::Spawn { .. }));
        let finishes = sink
            .events()
            .into_iter()
            .filter(|e| e.status == EventStatus::StepFinished)
            .count();
        assert_eq!(finishes, 2);
    }

    #[tokio::test]
    async fn test_events_land_in_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = LocalDispatcher::new();
        dispatcher
            .dispatch(request(dir.path(), sh("a", "echo hi"), fast(1)))
            .await
            .unwrap();
        dispatcher
            .dispatch(request(dir.path(), sh("b", "echo hi"), fast(1)))
            .await
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join(EVENTS_FILE_NAME)).unwrap();
        assert_eq!(text.lines().count(), 4);
    }
}
