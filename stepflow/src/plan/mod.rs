//! Plan model and validation.
//!
//! A plan is parsed into a [`PlanDocument`], then validated into a [`Plan`]
//! of typed [`Step`]s. Nothing executes until validation passes.

mod document;
mod step;
mod validate;

pub use document::{PlanDocument, RawStep, RawWhen};
pub use step::{
    CommandSpec, ContainerJobSpec, DatasetFetchSpec, DockerBuildSpec, DockerPushSpec,
    DownloadSpec, ModelFetchSpec, RetryOverride, Step, StepAction, WhenClause, WhenStatus,
};
pub use validate::Plan;
