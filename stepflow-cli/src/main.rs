//! Stepflow CLI
//!
//! Loads plan files, validates them, runs them on the in-process substrate
//! and inspects the event logs they leave behind.

mod logs;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use logs::LogsArgs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use stepflow::config::RunnerConfig;
use stepflow::core::{PipelineResult, RunIdentity};
use stepflow::pipeline::{FileCheckpointStore, PipelineScheduler};
use stepflow::plan::{Plan, PlanDocument};
use stepflow::utils::compact_local_stamp;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit status for a plan that failed to load or validate.
const EXIT_INVALID_PLAN: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "stepflow", version)]
#[command(about = "Durable pipeline orchestrator", long_about = None)]
struct Cli {
    /// Format of diagnostic logs written to stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate and run a plan
    Run(RunArgs),
    /// Validate a plan without running it
    Validate {
        /// Plan file (YAML or JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        plan: PathBuf,
    },
    /// Inspect a run-level event log
    Logs(LogsArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Plan file (YAML or JSON)
    #[arg(long, value_hint = ValueHint::FilePath)]
    plan: PathBuf,

    /// Workflow id; reusing one resumes its checkpoint
    #[arg(long)]
    workflow_id: Option<String>,

    /// Log directory, overriding the plan and STEPFLOW_LOG_DIR
    #[arg(long, value_hint = ValueHint::DirPath)]
    log_dir: Option<PathBuf>,

    /// Namespace scoping checkpoints
    #[arg(long, env = "STEPFLOW_NAMESPACE")]
    namespace: Option<String>,

    /// Queue identifier recorded with the run
    #[arg(long, env = "STEPFLOW_TASK_QUEUE")]
    task_queue: Option<String>,

    /// Checkpoint directory [default: <log-dir>/checkpoints]
    #[arg(long, env = "STEPFLOW_CHECKPOINT_DIR", value_hint = ValueHint::DirPath)]
    checkpoint_dir: Option<PathBuf>,

    /// Result output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = configure_tracing(cli.log_format) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    let outcome = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate { plan } => Ok(validate(&plan)),
        Commands::Logs(args) => logs::handle(args).await,
    };
    outcome.unwrap_or_else(|err| {
        error!(error = %err, "Command failed");
        eprintln!("error: {err:#}");
        ExitCode::FAILURE
    })
}

fn configure_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| anyhow!(err.to_string()))
}

/// Loads and validates a plan, reporting the failure on stderr.
fn load_plan(path: &Path, log_dir: Option<PathBuf>) -> Option<Plan> {
    let document = match PlanDocument::from_path(path) {
        Ok(document) => document,
        Err(err) => {
            eprintln!("error: {err}");
            return None;
        }
    };
    let document = match log_dir {
        Some(dir) => document.with_log_dir(dir),
        None => document,
    };
    match document.validate() {
        Ok(plan) => Some(plan),
        Err(err) => {
            eprintln!("plan validation failed [{}]: {err}", err.code());
            None
        }
    }
}

fn validate(path: &Path) -> ExitCode {
    match load_plan(path, None) {
        Some(plan) => {
            println!("plan is valid: {} steps", plan.steps.len());
            ExitCode::SUCCESS
        }
        None => ExitCode::from(EXIT_INVALID_PLAN),
    }
}

fn default_workflow_id() -> String {
    format!("pipeline-{}", compact_local_stamp())
}

/// Applies flags on top of the environment.
fn runner_config(args: &RunArgs) -> RunnerConfig {
    let mut config = RunnerConfig::from_env();
    if let Some(namespace) = &args.namespace {
        config = config.with_namespace(namespace.clone());
    }
    if let Some(queue) = &args.task_queue {
        config = config.with_task_queue(queue.clone());
    }
    config
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let Some(plan) = load_plan(&args.plan, args.log_dir.clone()) else {
        return Ok(ExitCode::from(EXIT_INVALID_PLAN));
    };
    let config = runner_config(&args);
    let log_dir = plan.log_dir.clone().unwrap_or_else(|| config.log_dir.clone());
    let checkpoint_dir = args
        .checkpoint_dir
        .clone()
        .unwrap_or_else(|| log_dir.join("checkpoints"));

    let scheduler = PipelineScheduler::from_config(&config, Arc::new(config.local_dispatcher()))
        .with_checkpoint_store(Arc::new(FileCheckpointStore::new(checkpoint_dir)));
    let identity = RunIdentity::new(args.workflow_id.clone().unwrap_or_else(default_workflow_id));
    info!(
        workflow_id = %identity.workflow_id,
        run_id = %identity.run_id,
        log_dir = %log_dir.display(),
        steps = plan.steps.len(),
        "Starting pipeline"
    );

    match scheduler.run(&plan, identity).await {
        Ok(result) => {
            print_result(&result, args.format)?;
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(halt) => {
            print_result(&halt.result, args.format)?;
            eprintln!("pipeline failed: {}", halt.error);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn render_result(result: &PipelineResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(result).context("failed to encode result as JSON"),
        OutputFormat::Yaml => serde_yaml::to_string(result).context("failed to encode result as YAML"),
    }
}

fn print_result(result: &PipelineResult, format: OutputFormat) -> Result<()> {
    println!("{}", render_result(result, format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow::core::{StepOutcome, StepRunResult};

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "stepflow",
            "run",
            "--plan",
            "plan.yaml",
            "--workflow-id",
            "nightly",
            "--log-dir",
            "out",
            "--namespace",
            "ci",
            "--format",
            "yaml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.plan, PathBuf::from("plan.yaml"));
                assert_eq!(args.workflow_id.as_deref(), Some("nightly"));
                assert_eq!(args.log_dir, Some(PathBuf::from("out")));
                assert_eq!(args.namespace.as_deref(), Some("ci"));
                assert_eq!(args.format, OutputFormat::Yaml);

                let config = runner_config(&args);
                assert_eq!(config.namespace, "ci");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_requires_plan() {
        assert!(Cli::try_parse_from(["stepflow", "run"]).is_err());
    }

    #[test]
    fn test_default_workflow_id_is_timestamped() {
        let id = default_workflow_id();
        assert!(id.starts_with("pipeline-"));
        assert_eq!(id.len(), "pipeline-".len() + "YYYYmmdd-HHMMSS".len());
    }

    #[test]
    fn test_flag_log_dir_overrides_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(
            &path,
            "log_dir: from-plan\nsteps:\n  - id: a\n    type: command\n    command: \"true\"\n",
        )
        .unwrap();

        let plan = load_plan(&path, None).unwrap();
        assert_eq!(plan.log_dir, Some(PathBuf::from("from-plan")));
        let plan = load_plan(&path, Some(PathBuf::from("from-flag"))).unwrap();
        assert_eq!(plan.log_dir, Some(PathBuf::from("from-flag")));
    }

    #[test]
    fn test_invalid_or_missing_plan_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(&path, "steps: []\n").unwrap();
        assert!(load_plan(&path, None).is_none());
        assert!(load_plan(&dir.path().join("missing.yaml"), None).is_none());
    }

    #[test]
    fn test_render_result_formats() {
        let result = PipelineResult::from_outcomes(vec![
            StepOutcome::completed(
                "a",
                StepRunResult {
                    name: "a".into(),
                    ..Default::default()
                },
            ),
            StepOutcome::skipped("b", "b", "dependency a did not succeed"),
        ]);
        let json: serde_json::Value =
            serde_json::from_str(&render_result(&result, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["steps"][1]["state"], "skipped");

        let yaml = render_result(&result, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("skip_reason: dependency a did not succeed"));
    }
}
