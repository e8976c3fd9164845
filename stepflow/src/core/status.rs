//! Step state and step type enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of step kinds a plan may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Run an external process.
    Command,
    /// Fetch a URL to a local file.
    Download,
    /// Build a container image.
    DockerBuild,
    /// Push a container image.
    DockerPush,
    /// Build a package with an arbitrary build command.
    PackageBuild,
    /// Run a command inside the sandboxed container launcher.
    ContainerJob,
    /// Fetch a dataset from the model hub.
    #[serde(rename = "hf_download_dataset")]
    DatasetFetch,
    /// Fetch a model snapshot from the model hub.
    #[serde(rename = "hf_download_model")]
    ModelFetch,
}

impl StepType {
    /// All supported step types, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Command,
        Self::Download,
        Self::DockerBuild,
        Self::DockerPush,
        Self::PackageBuild,
        Self::ContainerJob,
        Self::DatasetFetch,
        Self::ModelFetch,
    ];

    /// Returns the tag used for this type in plan documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Download => "download",
            Self::DockerBuild => "docker_build",
            Self::DockerPush => "docker_push",
            Self::PackageBuild => "package_build",
            Self::ContainerJob => "container_job",
            Self::DatasetFetch => "hf_download_dataset",
            Self::ModelFetch => "hf_download_model",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a type tag is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStepType(pub String);

impl fmt::Display for UnknownStepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown step type: {}", self.0)
    }
}

impl std::error::Error for UnknownStepType {}

impl FromStr for StepType {
    type Err = UnknownStepType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownStepType(s.to_string()))
    }
}

/// Lifecycle state of a step within one pipeline run.
///
/// Only the last three are recorded in outcomes; a step never leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not yet resolved.
    #[default]
    Pending,
    /// Dispatched and awaiting a result.
    Running,
    /// Ran and exited zero.
    Success,
    /// Ran and failed, or could not be executed.
    Failed,
    /// Not executed because its preconditions were unmet.
    Skipped,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StepState {
    /// Returns true if the state is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Returns true if the state counts against overall success.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}
