//! Plan documents as read from YAML or JSON.
//!
//! A [`PlanDocument`] is the unvalidated, loosely-typed form of a plan: every
//! field is optional so that validation, not parsing, reports what is
//! missing. [`PlanDocument::validate`](super::validate) turns it into a
//! [`Plan`](super::Plan).

use super::step::{
    CommandSpec, ContainerJobSpec, DatasetFetchSpec, DockerBuildSpec, DockerPushSpec,
    DownloadSpec, ModelFetchSpec, RetryOverride,
};
use crate::errors::PlanLoadError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A plan document: an optional log directory and an ordered step list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanDocument {
    /// Log directory override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Steps in declaration order.
    pub steps: Vec<RawStep>,
}

impl PlanDocument {
    /// Parses a document from YAML (or JSON) text.
    pub fn from_yaml_str(text: &str) -> Result<Self, PlanLoadError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reads and parses a plan file.
    pub fn from_path(path: &Path) -> Result<Self, PlanLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| PlanLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Replaces the log directory.
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Unvalidated `when` clause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawWhen {
    /// Referenced step id.
    pub step: String,
    /// Required status tag.
    pub status: String,
}

/// Unvalidated step.
///
/// Command fields live on the step itself; other kinds use a block named
/// after their type tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStep {
    /// Step identifier.
    pub id: String,
    /// Display name; defaults to the id.
    pub name: String,
    /// Type tag.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Dependency ids.
    pub depends_on: Vec<String>,
    /// Conditional clause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<RawWhen>,
    /// Program for `command` steps.
    pub command: String,
    /// Arguments for `command` steps.
    pub args: Vec<String>,
    /// Environment overlay for `command` steps.
    pub env: BTreeMap<String, String>,
    /// Working directory for `command` steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Timeout override; zero means the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Failure tolerance.
    pub allow_failure: bool,
    /// Retry policy override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOverride>,
    /// `download` parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadSpec>,
    /// `docker_build` parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_build: Option<DockerBuildSpec>,
    /// `docker_push` parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_push: Option<DockerPushSpec>,
    /// `package_build` parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_build: Option<CommandSpec>,
    /// `container_job` parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_job: Option<ContainerJobSpec>,
    /// `hf_download_dataset` parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hf_download_dataset: Option<DatasetFetchSpec>,
    /// `hf_download_model` parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hf_download_model: Option<ModelFetchSpec>,
}

impl RawStep {
    /// The inline command fields as a command spec.
    pub(crate) fn inline_command(&self) -> CommandSpec {
        CommandSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_plan() {
        let doc = PlanDocument::from_yaml_str(
            r#"
log_dir: /tmp/run-logs
steps:
  - id: fetch
    type: download
    download:
      url: https://example.com/data.tar
      output: data/data.tar
      sha256: abc123
  - id: build
    type: command
    command: make
    args: [all]
    env:
      CC: clang
    depends_on: [fetch]
    timeout_seconds: 30
    retry:
      max_attempts: 1
  - id: notify
    type: command
    command: echo
    when:
      step: build
      status: failure
"#,
        )
        .unwrap();

        assert_eq!(doc.log_dir, Some(PathBuf::from("/tmp/run-logs")));
        assert_eq!(doc.steps.len(), 3);
        let fetch = &doc.steps[0];
        assert_eq!(fetch.step_type, "download");
        assert_eq!(fetch.download.as_ref().unwrap().sha256.as_deref(), Some("abc123"));
        let build = &doc.steps[1];
        assert_eq!(build.env.get("CC").map(String::as_str), Some("clang"));
        assert_eq!(build.timeout_seconds, Some(30));
        assert_eq!(build.retry.unwrap().max_attempts, Some(1));
        assert_eq!(doc.steps[2].when.as_ref().unwrap().status, "failure");
    }

    #[test]
    fn test_parse_json_plan() {
        let doc = PlanDocument::from_yaml_str(
            r#"{"steps": [{"id": "a", "type": "docker_push", "docker_push": {"image": "repo/app:1"}}]}"#,
        )
        .unwrap();
        assert_eq!(doc.steps[0].docker_push.as_ref().unwrap().image, "repo/app:1");
        assert!(doc.log_dir.is_none());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = PlanDocument::from_path(Path::new("/nonexistent/plan.yaml")).unwrap_err();
        assert!(matches!(err, PlanLoadError::Read { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = PlanDocument::from_yaml_str("steps: {not: [a list").unwrap_err();
        assert!(matches!(err, PlanLoadError::Parse(_)));
    }
}
