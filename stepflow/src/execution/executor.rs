//! Dispatch from a step action to the engine that runs it.

use super::context::ExecutionContext;
use super::{argv, command::run_command, download::download};
use crate::core::StepRunResult;
use crate::errors::ExecutionFailure;
use crate::plan::StepAction;
use tracing::{info_span, Instrument};

/// Runs step actions. Holds the HTTP client shared by downloads.
#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    http: reqwest::Client,
}

impl StepExecutor {
    /// Creates an executor with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor that downloads through `client`.
    #[must_use]
    pub fn with_http_client(client: reqwest::Client) -> Self {
        Self { http: client }
    }

    /// Executes one action under `ctx`.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        action: &StepAction,
    ) -> Result<StepRunResult, ExecutionFailure> {
        let span = info_span!(
            "step",
            workflow_id = %ctx.identity.workflow_id,
            run_id = %ctx.identity.run_id,
            step_id = %ctx.step_id,
            step_type = %action.step_type(),
        );

        async {
            match action {
                StepAction::Command(spec) | StepAction::PackageBuild(spec) => {
                    run_command(ctx, spec).await
                }
                StepAction::Download(spec) => download(ctx, &self.http, spec).await,
                StepAction::DockerBuild(spec) => run_command(ctx, &argv::docker_build(spec)).await,
                StepAction::DockerPush(spec) => run_command(ctx, &argv::docker_push(spec)).await,
                StepAction::ContainerJob(spec) => {
                    run_command(ctx, &argv::container_job(spec)).await
                }
                StepAction::DatasetFetch(spec) => {
                    run_command(ctx, &argv::dataset_fetch(spec)).await
                }
                StepAction::ModelFetch(spec) => run_command(ctx, &argv::model_fetch(spec)).await,
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunIdentity;
    use crate::errors::ExecutionError;
    use crate::events::{CollectingEventSink, EventStatus};
    use crate::plan::{CommandSpec, ContainerJobSpec, DownloadSpec};
    use std::sync::Arc;

    fn ctx(dir: &std::path::Path, events: Arc<CollectingEventSink>) -> ExecutionContext {
        ExecutionContext::new(RunIdentity::new("wf").with_run_id("r"), "s", dir).with_events(events)
    }

    #[tokio::test]
    async fn test_package_build_runs_as_command() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(CollectingEventSink::new());
        let action = StepAction::PackageBuild(CommandSpec::new("sh").with_args(["-c", "echo built"]));

        let result = StepExecutor::new()
            .execute(&ctx(dir.path(), Arc::clone(&events)), &action)
            .await
            .unwrap();
        assert_eq!(result.stdout, "built\n");
        let statuses: Vec<_> = events.events().into_iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![EventStatus::StepStarted, EventStatus::StepFinished]);
    }

    #[tokio::test]
    async fn test_container_job_uses_launcher_argv() {
        let dir = tempfile::tempdir().unwrap();
        let action = StepAction::ContainerJob(ContainerJobSpec {
            command: "train".into(),
            launcher_path: Some("echo".into()),
            ..Default::default()
        });
        let events = Arc::new(CollectingEventSink::new());
        let result = StepExecutor::new()
            .execute(&ctx(dir.path(), events), &action)
            .await
            .unwrap();
        assert_eq!(result.stdout, "--entrypoint run-job.sh -- train\n");
    }

    #[tokio::test]
    async fn test_download_invalid_input_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(CollectingEventSink::new());
        let action = StepAction::Download(DownloadSpec::default());

        let failure = StepExecutor::new()
            .execute(&ctx(dir.path(), Arc::clone(&events)), &action)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ExecutionError::InvalidInput(_)));
        assert!(events.is_empty());
    }
}
