//! Static plan validation.

use super::document::{PlanDocument, RawStep};
use super::step::{Step, StepAction, WhenClause, WhenStatus};
use crate::core::StepType;
use crate::errors::PlanValidationError;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// A validated plan, ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Log directory override from the document.
    pub log_dir: Option<PathBuf>,
    /// Steps in declaration order.
    pub steps: Vec<Step>,
}

impl Plan {
    /// Step ids in declaration order.
    #[must_use]
    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Looks up a step by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Sets the log directory.
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Builds a plan from already-constructed steps, running the same
    /// structural checks as document validation.
    pub fn from_steps(steps: Vec<Step>) -> Result<Self, PlanValidationError> {
        if steps.is_empty() {
            return Err(PlanValidationError::EmptyPlan);
        }
        let mut ids = HashSet::new();
        for (index, step) in steps.iter().enumerate() {
            if step.id.is_empty() {
                return Err(PlanValidationError::MissingIdentifier { index });
            }
            if !ids.insert(step.id.as_str()) {
                return Err(PlanValidationError::DuplicateIdentifier {
                    id: step.id.clone(),
                });
            }
        }
        for step in &steps {
            check_references(&step.id, &step.depends_on, step.when.as_ref().map(|w| w.step.as_str()), &ids)?;
        }
        Ok(Self {
            log_dir: None,
            steps,
        })
    }
}

impl PlanDocument {
    /// Validates the document and produces a plan.
    ///
    /// Steps are checked one at a time for identity, type, and required
    /// fields; dependency and `when` references are checked in a second pass
    /// once every id is known. The first failure is returned.
    pub fn validate(self) -> Result<Plan, PlanValidationError> {
        if self.steps.is_empty() {
            return Err(PlanValidationError::EmptyPlan);
        }

        let mut ids: HashSet<String> = HashSet::with_capacity(self.steps.len());
        let mut typed = Vec::with_capacity(self.steps.len());
        for (index, raw) in self.steps.iter().enumerate() {
            if raw.id.is_empty() {
                return Err(PlanValidationError::MissingIdentifier { index });
            }
            if !ids.insert(raw.id.clone()) {
                return Err(PlanValidationError::DuplicateIdentifier { id: raw.id.clone() });
            }
            if raw.step_type.is_empty() {
                return Err(PlanValidationError::MissingType { id: raw.id.clone() });
            }
            let step_type: StepType =
                raw.step_type
                    .parse()
                    .map_err(|_| PlanValidationError::UnsupportedType {
                        id: raw.id.clone(),
                        step_type: raw.step_type.clone(),
                    })?;
            typed.push(build_step(raw, step_type)?);
        }

        let known: HashSet<&str> = ids.iter().map(String::as_str).collect();
        for (raw, step) in self.steps.iter().zip(typed.iter_mut()) {
            for dep in &raw.depends_on {
                if !known.contains(dep.as_str()) {
                    return Err(PlanValidationError::UnknownDependency {
                        id: raw.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            if let Some(when) = &raw.when {
                let status = WhenStatus::parse(&when.status)
                    .filter(|_| !when.step.is_empty())
                    .ok_or_else(|| PlanValidationError::InvalidCondition { id: raw.id.clone() })?;
                if !known.contains(when.step.as_str()) {
                    return Err(PlanValidationError::UnknownConditionTarget {
                        id: raw.id.clone(),
                        target: when.step.clone(),
                    });
                }
                step.when = Some(WhenClause {
                    step: when.step.clone(),
                    status,
                });
            }
        }

        Ok(Plan {
            log_dir: self.log_dir.filter(|dir| !dir.as_os_str().is_empty()),
            steps: typed,
        })
    }
}

fn check_references(
    id: &str,
    depends_on: &[String],
    when_target: Option<&str>,
    ids: &HashSet<&str>,
) -> Result<(), PlanValidationError> {
    if let Some(dep) = depends_on.iter().find(|d| !ids.contains(d.as_str())) {
        return Err(PlanValidationError::UnknownDependency {
            id: id.to_string(),
            dependency: dep.clone(),
        });
    }
    match when_target {
        Some("") => Err(PlanValidationError::InvalidCondition { id: id.to_string() }),
        Some(target) if !ids.contains(target) => Err(PlanValidationError::UnknownConditionTarget {
            id: id.to_string(),
            target: target.to_string(),
        }),
        _ => Ok(()),
    }
}

fn missing(id: &str, field: &str) -> PlanValidationError {
    PlanValidationError::MissingRequiredField {
        id: id.to_string(),
        field: field.to_string(),
    }
}

fn build_step(raw: &RawStep, step_type: StepType) -> Result<Step, PlanValidationError> {
    let id = raw.id.as_str();
    let action = match step_type {
        StepType::Command => {
            if raw.command.is_empty() {
                return Err(missing(id, "command"));
            }
            StepAction::Command(raw.inline_command())
        }
        StepType::Download => {
            let spec = raw.download.clone().ok_or_else(|| missing(id, "download"))?;
            if spec.url.is_empty() {
                return Err(missing(id, "download.url"));
            }
            if spec.output.as_os_str().is_empty() {
                return Err(missing(id, "download.output"));
            }
            StepAction::Download(spec)
        }
        StepType::DockerBuild => {
            let spec = raw.docker_build.clone().ok_or_else(|| missing(id, "docker_build"))?;
            if spec.image.is_empty() {
                return Err(missing(id, "docker_build.image"));
            }
            StepAction::DockerBuild(spec)
        }
        StepType::DockerPush => {
            let spec = raw.docker_push.clone().ok_or_else(|| missing(id, "docker_push"))?;
            if spec.image.is_empty() {
                return Err(missing(id, "docker_push.image"));
            }
            StepAction::DockerPush(spec)
        }
        StepType::PackageBuild => {
            let spec = raw.package_build.clone().ok_or_else(|| missing(id, "package_build"))?;
            if spec.command.is_empty() {
                return Err(missing(id, "package_build.command"));
            }
            StepAction::PackageBuild(spec)
        }
        StepType::ContainerJob => {
            let spec = raw.container_job.clone().ok_or_else(|| missing(id, "container_job"))?;
            if spec.command.is_empty() {
                return Err(missing(id, "container_job.command"));
            }
            StepAction::ContainerJob(spec)
        }
        StepType::DatasetFetch => {
            let spec = raw
                .hf_download_dataset
                .clone()
                .ok_or_else(|| missing(id, "hf_download_dataset"))?;
            if spec.dataset_id.is_empty() {
                return Err(missing(id, "hf_download_dataset.dataset_id"));
            }
            StepAction::DatasetFetch(spec)
        }
        StepType::ModelFetch => {
            let spec = raw
                .hf_download_model
                .clone()
                .ok_or_else(|| missing(id, "hf_download_model"))?;
            if spec.model_id.is_empty() {
                return Err(missing(id, "hf_download_model.model_id"));
            }
            StepAction::ModelFetch(spec)
        }
    };

    let name = if raw.name.is_empty() {
        raw.id.clone()
    } else {
        raw.name.clone()
    };

    Ok(Step {
        id: raw.id.clone(),
        name,
        action,
        depends_on: raw.depends_on.clone(),
        when: None,
        timeout: raw
            .timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
        allow_failure: raw.allow_failure,
        retry: raw.retry,
    })
}
