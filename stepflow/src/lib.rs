//! # Stepflow
//!
//! A durable pipeline orchestrator.
//!
//! Stepflow executes a directed graph of heterogeneous steps (commands,
//! downloads, image builds and pushes, package builds, container jobs,
//! dataset and model fetches) with:
//!
//! - **Static validation**: identifiers, references and required fields are
//!   checked before anything runs
//! - **Round-synchronous scheduling**: each round dispatches every eligible
//!   step concurrently and waits for all of them
//! - **Conditional branching**: `when` clauses and failure tolerance decide
//!   which downstream steps run
//! - **Durable step logs**: raw stdout/stderr files, structured JSONL lines
//!   and a run-level lifecycle event log
//! - **Resumption**: round-boundary checkpoints let a restarted run continue
//!   where it stopped
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stepflow::prelude::*;
//!
//! # async fn example() -> Result<(), StepflowError> {
//! let plan = PlanDocument::from_yaml_str(
//!     r"
//! steps:
//!   - id: hello
//!     type: command
//!     command: echo
//!     args: [hello]
//! ",
//! )?
//! .validate()?;
//!
//! let config = RunnerConfig::from_env();
//! let scheduler = PipelineScheduler::from_config(&config, Arc::new(config.local_dispatcher()));
//! match scheduler.run(&plan, RunIdentity::new("example")).await {
//!     Ok(result) => println!("success: {}", result.success),
//!     Err(halt) => eprintln!("halted: {}", halt.error),
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod execution;
pub mod pipeline;
pub mod plan;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::RunnerConfig;
    pub use crate::core::{PipelineResult, RunIdentity, StepOutcome, StepRunResult, StepState, StepType};
    pub use crate::errors::{
        CheckpointError, ExecutionError, ExecutionFailure, PipelineError, PipelineHalt,
        PlanLoadError, PlanValidationError, StepflowError,
    };
    pub use crate::events::{EventSink, JsonlEventLog, LifecycleEvent, LoggingEventSink, NoOpEventSink};
    pub use crate::execution::{ExecutionContext, StepExecutor};
    pub use crate::pipeline::{
        ActivityOptions, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
        LocalDispatcher, PipelineScheduler, RetryPolicy, StepDispatcher,
    };
    pub use crate::plan::{CommandSpec, Plan, PlanDocument, Step, StepAction, WhenStatus};
    pub use crate::utils::{iso_timestamp, Timestamp};
}
