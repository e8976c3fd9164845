//! Core domain types for stepflow.
//!
//! - Step state and type enums
//! - Run identity
//! - Step results, outcomes and the pipeline result

mod identity;
mod outcome;
mod status;

pub use identity::RunIdentity;
pub use outcome::{order_outcomes, PipelineResult, StepOutcome, StepRunResult};
pub use status::{StepState, StepType, UnknownStepType};
