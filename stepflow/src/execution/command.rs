//! External process execution.

use super::context::ExecutionContext;
use super::logs::{StepLogs, StreamCapture};
use super::{begin, finalize};
use crate::core::StepRunResult;
use crate::errors::{ExecutionError, ExecutionFailure};
use crate::plan::CommandSpec;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Runs a process to completion under the context's deadline.
///
/// The exit code is passed through verbatim, so a nonzero exit is an `Ok`
/// result. Failing to start the process, or exceeding the deadline, is an
/// error; on deadline the process is killed before returning.
pub async fn run_command(ctx: &ExecutionContext, spec: &CommandSpec) -> Result<StepRunResult, ExecutionFailure> {
    if spec.command.trim().is_empty() {
        return Err(ExecutionFailure::before_start(
            ExecutionError::InvalidInput("command is required".to_string()),
            ctx.step_name.clone(),
        ));
    }

    let (mut logs, start) = begin(ctx, spec.display_line());
    let outcome = spawn_and_wait(ctx, spec, &mut logs).await;
    finalize(ctx, logs, start, outcome)
}

async fn spawn_and_wait(
    ctx: &ExecutionContext,
    spec: &CommandSpec,
    logs: &mut StepLogs,
) -> Result<i32, ExecutionError> {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
        command: spec.command.clone(),
        source,
    })?;
    debug!(step_id = %ctx.step_id, pid = ?child.id(), "Process started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out_capture, err_capture) = logs.streams_mut();

    let waited = {
        let run = async {
            let (status, _, _) = tokio::join!(
                child.wait(),
                pump(stdout, out_capture),
                pump(stderr, err_capture)
            );
            status
        };
        tokio::time::timeout(ctx.timeout, run).await
    };

    match waited {
        Ok(status) => Ok(status?.code().unwrap_or(-1)),
        Err(_) => {
            warn!(step_id = %ctx.step_id, timeout_secs = ctx.timeout.as_secs_f64(), "Step timed out, killing process");
            if let Err(err) = child.kill().await {
                warn!(step_id = %ctx.step_id, error = %err, "Failed to kill timed-out process");
            }
            Err(ExecutionError::Timeout { timeout: ctx.timeout })
        }
    }
}

async fn pump<R>(reader: Option<R>, capture: &mut StreamCapture)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0_u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => capture.write(&buf[..n]),
            Err(err) => {
                warn!(error = %err, "Reading process output failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunIdentity;
    use crate::events::{CollectingEventSink, EventStatus};
    use std::sync::Arc;
    use std::time::Duration;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").with_args(["-c", script])
    }

    fn ctx(dir: &std::path::Path) -> ExecutionContext {
        ExecutionContext::new(RunIdentity::new("wf").with_run_id("r"), "step", dir)
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_command(&ctx(dir.path()), &sh("echo out; echo err >&2; exit 3"))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(result.error.is_none());
        let raw = std::fs::read_to_string(result.stderr_path.unwrap()).unwrap();
        assert_eq!(raw, "err\n");
    }

    #[tokio::test]
    async fn test_env_overlay_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let spec = sh("echo $GREETING; pwd")
            .with_env("GREETING", "world")
            .with_working_dir(work.path());
        let result = run_command(&ctx(dir.path()), &spec).await.unwrap();

        let mut lines = result.stdout.lines();
        assert_eq!(lines.next(), Some("world"));
        let pwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(pwd, std::fs::canonicalize(work.path()).unwrap());
    }

    #[tokio::test]
    async fn test_truncates_in_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path()).with_max_output_bytes(10);
        let result = run_command(&ctx, &sh("printf abcdefghijklmnopqrstuvwxyz"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "abcdefghij");
        assert!(result.stdout_truncated);
        let raw = std::fs::read_to_string(result.stdout_path.unwrap()).unwrap();
        assert_eq!(raw, "abcdefghijklmnopqrstuvwxyz");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = ctx(dir.path())
            .with_timeout(Duration::from_millis(300))
            .with_events(sink.clone());

        let started = std::time::Instant::now();
        let failure = run_command(&ctx, &CommandSpec::new("sleep").with_args(["30"]))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(failure.error.is_timeout());
        assert_eq!(failure.result.exit_code, -1);
        assert!(failure.result.error.as_deref().unwrap().contains("timed out"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, EventStatus::StepFinished);
        assert_eq!(events[1].exit_code, Some(-1));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let failure = run_command(&ctx(dir.path()), &CommandSpec::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ExecutionError::Spawn { .. }));
        assert!(failure.error.is_retryable());
        assert!(failure.result.stdout_path.is_some());
    }

    #[tokio::test]
    async fn test_empty_command_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let failure = run_command(&ctx(dir.path()), &CommandSpec::new("  "))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ExecutionError::InvalidInput(_)));
        assert!(!failure.error.is_retryable());
    }
}
