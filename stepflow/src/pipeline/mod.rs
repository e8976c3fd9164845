//! Pipeline scheduling and dispatch.
//!
//! This module provides:
//! - The round-synchronous scheduler
//! - The dispatcher seam and its in-process implementation
//! - Retry policies
//! - Round-boundary checkpoints

mod checkpoint;
mod dispatcher;
mod retry;
mod scheduler;


pub use checkpoint::{
    Checkpoint, CheckpointStatus, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
};
pub use dispatcher::{ActivityOptions, DispatchRequest, LocalDispatcher, StepDispatcher};
pub use retry::{with_retry, JitterStrategy, RetryPolicy};
pub use scheduler::{dependencies_complete, skip_decision, PipelineScheduler, SkipDecision};

#[cfg(test)]
pub(crate) use checkpoint::MockCheckpointStore;
