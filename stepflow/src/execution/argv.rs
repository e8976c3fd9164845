//! Parameter-to-argv translation for step kinds that delegate to a process.
//!
//! Every function here is pure: the same spec always produces the same
//! command line. Maps are ordered so flag order is stable.

use crate::plan::{CommandSpec, ContainerJobSpec, DatasetFetchSpec, DockerBuildSpec, DockerPushSpec, ModelFetchSpec};

/// Launcher used for container jobs when none is configured.
pub const DEFAULT_LAUNCHER: &str = "./container/launch_container.sh";
/// Entrypoint used for container jobs when none is configured.
pub const DEFAULT_ENTRYPOINT: &str = "run-job.sh";
/// Hub cache directory used when none is configured.
pub const DEFAULT_HF_CACHE_DIR: &str = "/opt/hf_cache";
/// Dataset configuration used when none is configured.
pub const DEFAULT_DATASET_CONFIG: &str = "default";
/// Dataset split used when none is configured.
pub const DEFAULT_DATASET_SPLIT: &str = "train[:100]";

const DATASET_SCRIPT: &str = r"
import os
cache_dir = os.environ['_HF_CACHE_DIR']
dataset_id = os.environ['_HF_DATASET_ID']
config = os.environ['_HF_CONFIG']
split = os.environ['_HF_SPLIT']
os.environ['HF_HOME'] = cache_dir
from datasets import load_dataset
ds = load_dataset(dataset_id, config, split=split, cache_dir=cache_dir)
print(f'Downloaded {len(ds)} rows from {dataset_id}')
";

const MODEL_SCRIPT: &str = r"
import os
cache_dir = os.environ['_HF_CACHE_DIR']
model_id = os.environ['_HF_MODEL_ID']
os.environ['HF_HOME'] = cache_dir
from huggingface_hub import snapshot_download
path = snapshot_download(model_id, cache_dir=cache_dir)
print(f'Downloaded {model_id} to {path}')
";

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `docker build -t <image> [-f ..] [--build-arg k=v].. [--label k=v].. [--platform ..] [--target ..] <context>`
#[must_use]
pub fn docker_build(spec: &DockerBuildSpec) -> CommandSpec {
    let mut args = vec!["build".to_string(), "-t".to_string(), spec.image.clone()];
    if let Some(dockerfile) = non_empty(spec.dockerfile.as_deref()) {
        args.extend(["-f".to_string(), dockerfile.to_string()]);
    }
    for (key, value) in &spec.build_args {
        args.extend(["--build-arg".to_string(), format!("{key}={value}")]);
    }
    for (key, value) in &spec.labels {
        args.extend(["--label".to_string(), format!("{key}={value}")]);
    }
    if let Some(platform) = non_empty(spec.platform.as_deref()) {
        args.extend(["--platform".to_string(), platform.to_string()]);
    }
    if let Some(target) = non_empty(spec.target.as_deref()) {
        args.extend(["--target".to_string(), target.to_string()]);
    }
    args.push(non_empty(spec.context.as_deref()).unwrap_or(".").to_string());

    CommandSpec::new("docker").with_args(args)
}

/// `docker push <image>`
#[must_use]
pub fn docker_push(spec: &DockerPushSpec) -> CommandSpec {
    CommandSpec::new("docker").with_args(["push", spec.image.as_str()])
}

/// `<launcher> --entrypoint <entrypoint> -- <command>`, with project and GPU
/// settings passed through the environment.
#[must_use]
pub fn container_job(spec: &ContainerJobSpec) -> CommandSpec {
    let launcher = spec
        .launcher_path
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| DEFAULT_LAUNCHER.to_string(), |p| p.display().to_string());
    let entrypoint = non_empty(spec.entrypoint.as_deref()).unwrap_or(DEFAULT_ENTRYPOINT);

    let mut cmd = CommandSpec::new(launcher).with_args([
        "--entrypoint",
        entrypoint,
        "--",
        spec.command.as_str(),
    ]);
    cmd.env.clone_from(&spec.env);
    if let Some(project) = non_empty(spec.project_id.as_deref()) {
        cmd.env.insert("STEPFLOW_PROJECT_ID".to_string(), project.to_string());
    }
    if !spec.gpu {
        cmd.env.insert("STEPFLOW_GPU".to_string(), "false".to_string());
    }
    cmd
}

/// `python3 -c <script>` loading a dataset split into the hub cache.
#[must_use]
pub fn dataset_fetch(spec: &DatasetFetchSpec) -> CommandSpec {
    CommandSpec::new("python3")
        .with_args(["-c", DATASET_SCRIPT])
        .with_env(
            "_HF_CACHE_DIR",
            non_empty(spec.cache_dir.as_deref()).unwrap_or(DEFAULT_HF_CACHE_DIR),
        )
        .with_env("_HF_DATASET_ID", spec.dataset_id.as_str())
        .with_env(
            "_HF_CONFIG",
            non_empty(spec.config.as_deref()).unwrap_or(DEFAULT_DATASET_CONFIG),
        )
        .with_env(
            "_HF_SPLIT",
            non_empty(spec.split.as_deref()).unwrap_or(DEFAULT_DATASET_SPLIT),
        )
}

/// `python3 -c <script>` downloading a model snapshot into the hub cache.
#[must_use]
pub fn model_fetch(spec: &ModelFetchSpec) -> CommandSpec {
    CommandSpec::new("python3")
        .with_args(["-c", MODEL_SCRIPT])
        .with_env(
            "_HF_CACHE_DIR",
            non_empty(spec.cache_dir.as_deref()).unwrap_or(DEFAULT_HF_CACHE_DIR),
        )
        .with_env("_HF_MODEL_ID", spec.model_id.as_str())
}
