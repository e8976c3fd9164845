//! Scripted dispatchers for scheduler tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::StepRunResult;
use crate::errors::{ExecutionError, ExecutionFailure};
use crate::pipeline::{DispatchRequest, StepDispatcher};

/// What a scripted step does when dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    /// Completes with this exit code and stdout.
    Exit {
        /// Exit code.
        code: i32,
        /// Captured stdout.
        stdout: String,
    },
    /// Fails with a timeout error.
    Timeout,
    /// Fails to start with this message.
    SpawnFailure(String),
    /// Panics inside the dispatch task.
    Panic,
}

impl ScriptedResponse {
    /// Completes with `code` and no output.
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self::Exit {
            code,
            stdout: String::new(),
        }
    }
}

/// One recorded dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    /// Step id.
    pub step_id: String,
    /// Run id of the request.
    pub run_id: String,
    /// When the dispatch began.
    pub started: Instant,
    /// When the dispatch returned.
    pub finished: Instant,
}

#[derive(Debug, Clone)]
struct Script {
    response: ScriptedResponse,
    delay: Duration,
}

/// A dispatcher that answers from a per-step script without running
/// anything. Unscripted steps exit zero immediately.
#[derive(Debug, Default)]
pub struct ScriptedDispatcher {
    scripts: Mutex<HashMap<String, Script>>,
    records: Mutex<Vec<DispatchRecord>>,
    requests: Mutex<Vec<DispatchRequest>>,
}

impl ScriptedDispatcher {
    /// Creates a dispatcher where every step succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `step_id` to respond with `response`.
    #[must_use]
    pub fn respond(self, step_id: impl Into<String>, response: ScriptedResponse) -> Self {
        self.respond_after(step_id, response, Duration::ZERO)
    }

    /// Scripts `step_id` to respond with `response` after `delay`.
    #[must_use]
    pub fn respond_after(self, step_id: impl Into<String>, response: ScriptedResponse, delay: Duration) -> Self {
        self.scripts
            .lock()
            .insert(step_id.into(), Script { response, delay });
        self
    }

    /// Step ids in the order their dispatches began.
    #[must_use]
    pub fn dispatched(&self) -> Vec<String> {
        let mut records = self.records();
        records.sort_by_key(|r| r.started);
        records.into_iter().map(|r| r.step_id).collect()
    }

    /// Every completed dispatch.
    #[must_use]
    pub fn records(&self) -> Vec<DispatchRecord> {
        self.records.lock().clone()
    }

    /// The completed dispatch of `step_id`, if any.
    #[must_use]
    pub fn record(&self, step_id: &str) -> Option<DispatchRecord> {
        self.records.lock().iter().find(|r| r.step_id == step_id).cloned()
    }

    /// Number of dispatches of `step_id`.
    #[must_use]
    pub fn call_count(&self, step_id: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.step.id == step_id)
            .count()
    }

    /// Every request received, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl StepDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<StepRunResult, ExecutionFailure> {
        let started = Instant::now();
        self.requests.lock().push(request.clone());
        let script = self.scripts.lock().get(&request.step.id).cloned();
        let Script { response, delay } = script.unwrap_or(Script {
            response: ScriptedResponse::exit(0),
            delay: Duration::ZERO,
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = StepRunResult {
            name: request.step.name.clone(),
            duration_secs: started.elapsed().as_secs_f64(),
            ..Default::default()
        };
        let outcome = match response {
            ScriptedResponse::Exit { code, stdout } => Ok(StepRunResult {
                exit_code: code,
                stdout,
                ..result
            }),
            ScriptedResponse::Timeout => Err(ExecutionFailure::new(
                ExecutionError::Timeout {
                    timeout: request.options.timeout,
                },
                result,
            )),
            ScriptedResponse::SpawnFailure(message) => Err(ExecutionFailure::new(
                ExecutionError::Spawn {
                    command: request.step.id.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
                },
                result,
            )),
            ScriptedResponse::Panic => panic!("scripted panic in step {}", request.step.id),
        };

        self.records.lock().push(DispatchRecord {
            step_id: request.step.id,
            run_id: request.identity.run_id,
            started,
            finished: Instant::now(),
        });
        outcome
    }
}
