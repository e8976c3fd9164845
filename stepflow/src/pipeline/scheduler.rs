//! The round-synchronous pipeline scheduler.
//!
//! Each round scans the pending steps in plan order, finalizes the ones
//! whose preconditions can no longer hold as skipped, dispatches the rest
//! concurrently and waits for every one of them before merging results.
//! Outcomes are only ever mutated here, between rounds.

use super::checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore};
use super::dispatcher::{ActivityOptions, DispatchRequest, StepDispatcher};
use crate::config::RunnerConfig;
use crate::core::{order_outcomes, PipelineResult, RunIdentity, StepOutcome, StepRunResult, StepState};
use crate::errors::{ExecutionError, ExecutionFailure, PipelineError, PipelineHalt};
use crate::plan::{Plan, Step};
use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// What to do with a dependency-eligible step this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    /// Dispatch it.
    Run,
    /// Finalize it as skipped with this reason.
    Skip(String),
    /// Its `when` target has no outcome yet; leave it pending.
    Unresolved,
}

/// Returns true once every dependency of `step` has an outcome.
#[must_use]
pub fn dependencies_complete(step: &Step, outcomes: &HashMap<String, StepOutcome>) -> bool {
    step.depends_on.iter().all(|dep| outcomes.contains_key(dep))
}

/// Decides whether a dependency-eligible step runs, is skipped, or waits.
///
/// A `when` clause replaces the dependency-success check entirely: the step
/// runs exactly when the referenced outcome's state matches the clause.
#[must_use]
pub fn skip_decision(step: &Step, outcomes: &HashMap<String, StepOutcome>) -> SkipDecision {
    if let Some(when) = &step.when {
        return match outcomes.get(&when.step) {
            None => SkipDecision::Unresolved,
            Some(target) if when.status.is_satisfied_by(target.state) => SkipDecision::Run,
            Some(target) => SkipDecision::Skip(format!(
                "when condition not met: {} is {}, expected {}",
                when.step, target.state, when.status
            )),
        };
    }

    for dep in &step.depends_on {
        let succeeded = outcomes
            .get(dep)
            .is_some_and(|outcome| outcome.state == StepState::Success);
        if !succeeded {
            return SkipDecision::Skip(format!("dependency {dep} did not succeed"));
        }
    }
    SkipDecision::Run
}

/// Where a run starts from.
enum Start {
    Fresh(RunIdentity),
    Resume(Checkpoint),
    Completed(PipelineResult),
}

/// Drives a validated plan to a [`PipelineResult`].
#[derive(Clone)]
pub struct PipelineScheduler {
    dispatcher: Arc<dyn StepDispatcher>,
    options: ActivityOptions,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    namespace: String,
    task_queue: String,
    default_log_dir: PathBuf,
}

impl std::fmt::Debug for PipelineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineScheduler")
            .field("options", &self.options)
            .field("checkpoints", &self.checkpoints.is_some())
            .field("namespace", &self.namespace)
            .field("task_queue", &self.task_queue)
            .field("default_log_dir", &self.default_log_dir)
            .finish_non_exhaustive()
    }
}

impl PipelineScheduler {
    /// Creates a scheduler with default options and no checkpointing.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn StepDispatcher>) -> Self {
        let config = RunnerConfig::default();
        Self::from_config(&config, dispatcher)
    }

    /// Creates a scheduler from run-wide configuration.
    #[must_use]
    pub fn from_config(config: &RunnerConfig, dispatcher: Arc<dyn StepDispatcher>) -> Self {
        Self {
            dispatcher,
            options: config.activity,
            checkpoints: None,
            namespace: config.namespace.clone(),
            task_queue: config.task_queue.clone(),
            default_log_dir: config.log_dir.clone(),
        }
    }

    /// Sets the default activity options.
    #[must_use]
    pub fn with_options(mut self, options: ActivityOptions) -> Self {
        self.options = options;
        self
    }

    /// Records round boundaries in `store` and resumes from it.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Sets the namespace scoping checkpoints.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the queue identifier recorded with the run.
    #[must_use]
    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = task_queue.into();
        self
    }

    /// Sets the log directory used when the plan names none.
    #[must_use]
    pub fn with_default_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_log_dir = dir.into();
        self
    }

    /// Runs `plan` to completion or to the first non-tolerated failure.
    ///
    /// On halt the error carries every outcome finalized so far, in plan
    /// order; steps never reached are absent.
    pub async fn run(&self, plan: &Plan, identity: RunIdentity) -> Result<PipelineResult, PipelineHalt> {
        let span = info_span!(
            "pipeline",
            workflow_id = %identity.workflow_id,
            run_id = tracing::field::Empty,
            namespace = %self.namespace,
            task_queue = %self.task_queue,
            steps = plan.steps.len(),
        );
        self.run_rounds(plan, identity).instrument(span).await
    }

    async fn run_rounds(&self, plan: &Plan, identity: RunIdentity) -> Result<PipelineResult, PipelineHalt> {
        let order = plan.step_ids();
        let log_dir = plan
            .log_dir
            .clone()
            .unwrap_or_else(|| self.default_log_dir.clone());

        let (identity, mut outcomes, mut round) = match self.start(&order, identity).await? {
            Start::Fresh(identity) => (identity, HashMap::new(), 0),
            Start::Resume(checkpoint) => {
                info!(
                    round = checkpoint.round,
                    finished = checkpoint.outcomes.len(),
                    "Resuming pipeline from checkpoint"
                );
                let outcomes = checkpoint.outcome_map();
                (checkpoint.identity, outcomes, checkpoint.round)
            }
            Start::Completed(result) => return Ok(result),
        };
        Span::current().record("run_id", identity.run_id.as_str());

        let mut pending: Vec<&Step> = plan
            .steps
            .iter()
            .filter(|step| !outcomes.contains_key(&step.id))
            .collect();

        while !pending.is_empty() {
            round += 1;
            let mut progressed = false;
            let mut runnable: Vec<&Step> = Vec::new();
            let mut waiting: Vec<&Step> = Vec::new();

            for step in pending {
                if !dependencies_complete(step, &outcomes) {
                    waiting.push(step);
                    continue;
                }
                match skip_decision(step, &outcomes) {
                    SkipDecision::Run => runnable.push(step),
                    SkipDecision::Skip(reason) => {
                        info!(round, step_id = %step.id, reason = %reason, "Skipping step");
                        outcomes.insert(step.id.clone(), StepOutcome::skipped(&step.id, &step.name, reason));
                        progressed = true;
                    }
                    SkipDecision::Unresolved => waiting.push(step),
                }
            }
            pending = waiting;

            if runnable.is_empty() {
                if progressed {
                    self.record(&identity, round, CheckpointStatus::InProgress, &outcomes, &order)
                        .await;
                    continue;
                }
                let error = PipelineError::Deadlock {
                    pending: pending.iter().map(|step| step.id.clone()).collect(),
                };
                warn!(round, error = %error, "Pipeline stalled");
                return Err(self.halt(&identity, round, error, &outcomes, &order).await);
            }

            info!(
                round,
                runnable = runnable.len(),
                pending = pending.len(),
                "Dispatching round"
            );
            let halt = self.dispatch_round(&identity, &log_dir, &runnable, &mut outcomes).await;
            if let Some(error) = halt {
                return Err(self.halt(&identity, round, error, &outcomes, &order).await);
            }
            self.record(&identity, round, CheckpointStatus::InProgress, &outcomes, &order)
                .await;
        }

        let result = PipelineResult::from_outcomes(order_outcomes(&outcomes, &order));
        self.record(&identity, round, CheckpointStatus::Completed, &outcomes, &order)
            .await;
        info!(rounds = round, success = result.success, "Pipeline finished");
        Ok(result)
    }

    /// Dispatches one round and merges every result in plan order. Returns
    /// the error of the first non-tolerated failure, if any.
    async fn dispatch_round(
        &self,
        identity: &RunIdentity,
        log_dir: &Path,
        runnable: &[&Step],
        outcomes: &mut HashMap<String, StepOutcome>,
    ) -> Option<PipelineError> {
        let handles = runnable.iter().map(|step| {
            let dispatcher = Arc::clone(&self.dispatcher);
            let request = DispatchRequest {
                identity: identity.clone(),
                step: (*step).clone(),
                log_dir: log_dir.to_path_buf(),
                options: self.options.for_step(step),
            };
            debug!(step_id = %step.id, step_type = %step.step_type(), "Dispatching step");
            tokio::spawn(async move { dispatcher.dispatch(request).await }.in_current_span())
        });
        let joined = join_all(handles).await;

        let mut halt = None;
        for (step, joined) in runnable.iter().zip(joined) {
            let dispatched = joined.unwrap_or_else(|err| {
                let error = ExecutionError::Panicked(err.to_string());
                Err(ExecutionFailure::new(
                    error,
                    StepRunResult {
                        name: step.name.clone(),
                        ..Default::default()
                    },
                ))
            });

            let outcome = match dispatched {
                Ok(result) => {
                    let outcome = StepOutcome::completed(&step.id, result);
                    if outcome.state == StepState::Failed {
                        let exit_code = outcome.exit_code().unwrap_or(-1);
                        if step.allow_failure {
                            warn!(step_id = %step.id, exit_code, "Step failed; failure tolerated");
                        } else if halt.is_none() {
                            halt = Some(PipelineError::StepFailed {
                                id: step.id.clone(),
                                exit_code,
                            });
                        }
                    } else {
                        info!(step_id = %step.id, "Step succeeded");
                    }
                    outcome
                }
                Err(ExecutionFailure { error, result }) => {
                    warn!(
                        step_id = %step.id,
                        allow_failure = step.allow_failure,
                        error = %error,
                        "Step execution failed"
                    );
                    if !step.allow_failure && halt.is_none() {
                        halt = Some(PipelineError::Execution {
                            id: step.id.clone(),
                            source: error,
                        });
                    }
                    StepOutcome::errored(&step.id, result)
                }
            };
            outcomes.insert(step.id.clone(), outcome);
        }
        halt
    }

    async fn start(&self, order: &[String], identity: RunIdentity) -> Result<Start, PipelineHalt> {
        let Some(store) = &self.checkpoints else {
            return Ok(Start::Fresh(identity));
        };
        let checkpoint = store
            .load(&self.namespace, &identity.workflow_id)
            .await
            .map_err(|err| PipelineHalt::new(err.into(), PipelineResult::halted(Vec::new())))?;

        match checkpoint {
            None => Ok(Start::Fresh(identity)),
            Some(checkpoint) => match checkpoint.status.clone() {
                CheckpointStatus::InProgress => Ok(Start::Resume(checkpoint)),
                CheckpointStatus::Completed => {
                    info!(round = checkpoint.round, "Pipeline already completed");
                    let outcomes = checkpoint.outcome_map();
                    Ok(Start::Completed(PipelineResult::from_outcomes(order_outcomes(
                        &outcomes, order,
                    ))))
                }
                CheckpointStatus::Halted { reason } => {
                    let outcomes = checkpoint.outcome_map();
                    Err(PipelineHalt::new(
                        PipelineError::PreviouslyHalted { reason },
                        PipelineResult::halted(order_outcomes(&outcomes, order)),
                    ))
                }
            },
        }
    }

    async fn halt(
        &self,
        identity: &RunIdentity,
        round: u32,
        error: PipelineError,
        outcomes: &HashMap<String, StepOutcome>,
        order: &[String],
    ) -> PipelineHalt {
        let status = CheckpointStatus::Halted {
            reason: error.to_string(),
        };
        self.record(identity, round, status, outcomes, order).await;
        PipelineHalt::new(error, PipelineResult::halted(order_outcomes(outcomes, order)))
    }

    /// Saves a checkpoint. A failed save degrades durability, not the run.
    async fn record(
        &self,
        identity: &RunIdentity,
        round: u32,
        status: CheckpointStatus,
        outcomes: &HashMap<String, StepOutcome>,
        order: &[String],
    ) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        let mut checkpoint = Checkpoint::new(&self.namespace, &self.task_queue, identity.clone());
        checkpoint.round = round;
        checkpoint.status = status;
        checkpoint.outcomes = order_outcomes(outcomes, order);
        if let Err(err) = store.save(&checkpoint).await {
            warn!(round, error = %err, "Failed to save checkpoint");
        }
    }
}
