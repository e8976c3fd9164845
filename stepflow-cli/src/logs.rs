//! `stepflow logs`: inspection of a run-level `events.jsonl`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueHint};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use stepflow::events::{
    events_for_run, list_runs, read_events, step_summaries, EventFollower, LifecycleEvent, RunSummary,
    StepProgress, StepSummary, EVENTS_FILE_NAME,
};

/// Interval between polls of `logs follow`.
const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Log directory holding events.jsonl
    #[arg(long, env = "STEPFLOW_LOG_DIR", default_value = "logs", value_hint = ValueHint::DirPath)]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: LogsCommand,
}

#[derive(Debug, Subcommand)]
enum LogsCommand {
    /// List runs, newest first
    ListRuns,
    /// Show per-step status of one run
    ShowSteps(RunSelector),
    /// Print every event of one run as JSON lines
    Tail(RunSelector),
    /// Print events of one run as they are appended
    Follow(RunSelector),
}

#[derive(Debug, Args)]
struct RunSelector {
    /// Workflow id
    #[arg(long)]
    workflow_id: String,
    /// Run id
    #[arg(long)]
    run_id: String,
}

pub async fn handle(args: LogsArgs) -> Result<ExitCode> {
    let path = args.log_dir.join(EVENTS_FILE_NAME);
    match args.command {
        LogsCommand::ListRuns => {
            for run in list_runs(&load(&path)?) {
                println!("{}", run_line(&run));
            }
        }
        LogsCommand::ShowSteps(run) => {
            for step in step_summaries(&load(&path)?, &run.workflow_id, &run.run_id) {
                println!("{}", step_line(&step));
            }
        }
        LogsCommand::Tail(run) => {
            for event in events_for_run(&load(&path)?, &run.workflow_id, &run.run_id) {
                println!("{}", event_line(&event)?);
            }
        }
        LogsCommand::Follow(run) => {
            if !path.exists() {
                eprintln!("events file not found: {}", path.display());
                return Ok(ExitCode::FAILURE);
            }
            follow(&path, &run).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn load(path: &Path) -> Result<Vec<LifecycleEvent>> {
    read_events(path).with_context(|| format!("failed to read {}", path.display()))
}

async fn follow(path: &Path, run: &RunSelector) -> Result<()> {
    let mut follower = EventFollower::from_end(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut ticker = tokio::time::interval(FOLLOW_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = ticker.tick() => {
                let events = follower
                    .poll()
                    .with_context(|| format!("failed to read {}", path.display()))?;
                for event in events.iter().filter(|e| e.belongs_to(&run.workflow_id, &run.run_id)) {
                    println!("{}", event_line(event)?);
                }
            }
        }
    }
}

fn run_line(run: &RunSummary) -> String {
    format!("{}\t{}\t{}", run.workflow_id, run.run_id, run.last_timestamp)
}

fn step_line(step: &StepSummary) -> String {
    let progress = match step.progress {
        StepProgress::Started => "started",
        StepProgress::Finished => "finished",
    };
    let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        step.step_id,
        progress,
        step.exit_code.map(|c| c.to_string()).unwrap_or_default(),
        step.duration_secs.map(|d| format!("{d:.3}")).unwrap_or_default(),
        path(&step.stdout_path),
        path(&step.stderr_path),
        path(&step.structured_path),
    )
}

fn event_line(event: &LifecycleEvent) -> Result<String> {
    serde_json::to_string(event).context("failed to encode event")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_run_line() {
        let run = RunSummary {
            workflow_id: "wf".into(),
            run_id: "r1".into(),
            last_timestamp: "2024-01-01T00:00:00.000000+00:00".into(),
        };
        assert_eq!(run_line(&run), "wf\tr1\t2024-01-01T00:00:00.000000+00:00");
    }

    #[test]
    fn test_step_line_started_and_finished() {
        let started = StepSummary {
            step_id: "build".into(),
            progress: StepProgress::Started,
            exit_code: None,
            duration_secs: None,
            stdout_path: None,
            stderr_path: None,
            structured_path: Some(PathBuf::from("logs/x_structured.jsonl")),
        };
        assert_eq!(step_line(&started), "build\tstarted\t\t\t\t\tlogs/x_structured.jsonl");

        let finished = StepSummary {
            progress: StepProgress::Finished,
            exit_code: Some(0),
            duration_secs: Some(1.5),
            stdout_path: Some(PathBuf::from("logs/x_stdout.log")),
            ..started
        };
        assert_eq!(
            step_line(&finished),
            "build\tfinished\t0\t1.500\tlogs/x_stdout.log\t\tlogs/x_structured.jsonl"
        );
    }

    #[tokio::test]
    async fn test_missing_events_file_for_follow_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = LogsArgs {
            log_dir: dir.path().to_path_buf(),
            command: LogsCommand::Follow(RunSelector {
                workflow_id: "wf".into(),
                run_id: "r".into(),
            }),
        };
        let code = handle(args).await.unwrap();
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::FAILURE));
    }

    #[tokio::test]
    async fn test_list_runs_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let args = LogsArgs {
            log_dir: dir.path().to_path_buf(),
            command: LogsCommand::ListRuns,
        };
        let code = handle(args).await.unwrap();
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::SUCCESS));
    }
}
