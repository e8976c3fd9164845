//! The step execution primitive.
//!
//! One execution runs one step's action under a deadline with full lifecycle
//! logging: a start event, three per-step log files, a capped in-memory copy
//! of the output, and exactly one finish event on every exit path.
//!
//! Most step kinds are argv translations onto [`run_command`]; downloads are
//! the one kind with their own engine.

pub mod argv;
mod command;
mod context;
mod download;
mod executor;
pub mod logs;

pub use command::run_command;
pub use context::{ExecutionContext, DEFAULT_STEP_TIMEOUT};
pub use download::download;
#[cfg(test)]
pub(crate) use download::test_server;
pub use executor::StepExecutor;
pub use logs::{
    resolve_log_dir, safe_name, CapturedOutput, LogPaths, StepLogs, Stream, StructuredLogLine,
    DEFAULT_MAX_OUTPUT_BYTES,
};

use crate::core::StepRunResult;
use crate::errors::{ExecutionError, ExecutionFailure};
use crate::events::LifecycleEvent;
use std::time::Instant;

/// Opens the step's logs and records the start event.
fn begin(ctx: &ExecutionContext, message: String) -> (StepLogs, Instant) {
    let logs = StepLogs::open(
        &ctx.log_dir,
        &ctx.identity,
        &ctx.step_id,
        &ctx.step_name,
        ctx.max_output_bytes,
    );
    ctx.events.try_emit(&LifecycleEvent::started(
        &ctx.identity,
        &ctx.step_id,
        &ctx.step_name,
        logs.paths().structured.clone(),
        message,
    ));
    (logs, Instant::now())
}

/// Closes the step's logs, builds the result and records the finish event.
fn finalize(
    ctx: &ExecutionContext,
    logs: StepLogs,
    start: Instant,
    outcome: Result<i32, ExecutionError>,
) -> Result<StepRunResult, ExecutionFailure> {
    let duration_secs = start.elapsed().as_secs_f64();
    let captured = logs.finish();
    let result = StepRunResult {
        name: ctx.step_name.clone(),
        exit_code: outcome.as_ref().map_or(-1, |code| *code),
        stdout: captured.stdout,
        stderr: captured.stderr,
        stdout_truncated: captured.stdout_truncated,
        stderr_truncated: captured.stderr_truncated,
        stdout_path: captured.paths.stdout,
        stderr_path: captured.paths.stderr,
        structured_path: captured.paths.structured,
        duration_secs,
        error: None,
    };

    match outcome {
        Ok(_) => {
            ctx.events.try_emit(&LifecycleEvent::finished(&ctx.identity, &ctx.step_id, &result));
            Ok(result)
        }
        Err(error) => {
            let failure = ExecutionFailure::new(error, result);
            ctx.events
                .try_emit(&LifecycleEvent::finished(&ctx.identity, &ctx.step_id, &failure.result));
            Err(failure)
        }
    }
}
