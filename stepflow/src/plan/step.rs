//! Validated plan nodes and their type-specific parameter blocks.

use crate::core::{StepState, StepType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Parameters of an external process.
///
/// Used directly by `command` steps and by `package_build` blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    /// Program to run.
    pub command: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Environment overlay on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Working directory; inherited when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Creates a spec for a program with no arguments.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Renders the command line for logs and events.
    #[must_use]
    pub fn display_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Parameters of an HTTP download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSpec {
    /// Source URL.
    pub url: String,
    /// Destination file.
    pub output: PathBuf,
    /// Expected hex SHA-256 of the content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Parameters of a container image build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerBuildSpec {
    /// Image tag.
    pub image: String,
    /// Build context directory (`.` when absent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Dockerfile path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Build arguments.
    pub build_args: BTreeMap<String, String>,
    /// Image labels.
    pub labels: BTreeMap<String, String>,
    /// Target platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Build stage target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Parameters of a container image push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerPushSpec {
    /// Image tag.
    pub image: String,
}

/// Parameters of a sandboxed container job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerJobSpec {
    /// Project the job runs for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Entrypoint script inside the container.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// Command passed to the entrypoint.
    pub command: String,
    /// Environment overlay.
    pub env: BTreeMap<String, String>,
    /// Whether the job needs a GPU.
    pub gpu: bool,
    /// Launcher script on the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher_path: Option<PathBuf>,
}

/// Parameters of a hub dataset fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetFetchSpec {
    /// Dataset repository id.
    pub dataset_id: String,
    /// Dataset configuration name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    /// Split expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,
    /// Local cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
}

/// Parameters of a hub model fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFetchSpec {
    /// Model repository id.
    pub model_id: String,
    /// Local cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
}

/// The work a step performs, one variant per step type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Run an external process.
    Command(CommandSpec),
    /// Fetch a URL to a file.
    Download(DownloadSpec),
    /// Build a container image.
    DockerBuild(DockerBuildSpec),
    /// Push a container image.
    DockerPush(DockerPushSpec),
    /// Run a package build command.
    PackageBuild(CommandSpec),
    /// Run a sandboxed container job.
    ContainerJob(ContainerJobSpec),
    /// Fetch a hub dataset.
    DatasetFetch(DatasetFetchSpec),
    /// Fetch a hub model.
    ModelFetch(ModelFetchSpec),
}

impl StepAction {
    /// Returns the type tag of this action.
    #[must_use]
    pub const fn step_type(&self) -> StepType {
        match self {
            Self::Command(_) => StepType::Command,
            Self::Download(_) => StepType::Download,
            Self::DockerBuild(_) => StepType::DockerBuild,
            Self::DockerPush(_) => StepType::DockerPush,
            Self::PackageBuild(_) => StepType::PackageBuild,
            Self::ContainerJob(_) => StepType::ContainerJob,
            Self::DatasetFetch(_) => StepType::DatasetFetch,
            Self::ModelFetch(_) => StepType::ModelFetch,
        }
    }
}

/// Required upstream state in a `when` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenStatus {
    /// The referenced step must have succeeded.
    Success,
    /// The referenced step must have failed.
    Failure,
}

impl WhenStatus {
    /// Parses a clause tag; only `success` and `failure` are recognized.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }

    /// Returns true if an upstream outcome in `state` satisfies the clause.
    #[must_use]
    pub fn is_satisfied_by(self, state: StepState) -> bool {
        matches!(
            (self, state),
            (Self::Success, StepState::Success) | (Self::Failure, StepState::Failed)
        )
    }
}

impl fmt::Display for WhenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Conditional-execution clause: run only if `step` ended in `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhenClause {
    /// Referenced step id.
    pub step: String,
    /// Required terminal status.
    pub status: WhenStatus,
}

/// Per-step override of the default retry policy, field by field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverride {
    /// Maximum attempts including the first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_interval_seconds: Option<f64>,
    /// Multiplier applied to the delay after each retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_coefficient: Option<f64>,
    /// Cap on the delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_interval_seconds: Option<f64>,
}

/// A validated plan node.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique identifier.
    pub id: String,
    /// Display name, defaulted to the id.
    pub name: String,
    /// The work to perform.
    pub action: StepAction,
    /// Steps that must be terminal before this one is considered.
    pub depends_on: Vec<String>,
    /// Optional conditional-execution clause.
    pub when: Option<WhenClause>,
    /// Step-level timeout override.
    pub timeout: Option<Duration>,
    /// Whether a failure of this step lets the pipeline continue.
    pub allow_failure: bool,
    /// Step-level retry override.
    pub retry: Option<RetryOverride>,
}

impl Step {
    /// Creates a step with no dependencies, named after its id.
    #[must_use]
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            action,
            depends_on: Vec::new(),
            when: None,
            timeout: None,
            allow_failure: false,
            retry: None,
        }
    }

    /// Creates a command step.
    #[must_use]
    pub fn command(id: impl Into<String>, spec: CommandSpec) -> Self {
        Self::new(id, StepAction::Command(spec))
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds dependencies.
    #[must_use]
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Sets the conditional clause.
    #[must_use]
    pub fn when(mut self, step: impl Into<String>, status: WhenStatus) -> Self {
        self.when = Some(WhenClause {
            step: step.into(),
            status,
        });
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks the step failure-tolerant.
    #[must_use]
    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Sets a retry override.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryOverride) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns the type tag of the step.
    #[must_use]
    pub fn step_type(&self) -> StepType {
        self.action.step_type()
    }
}
