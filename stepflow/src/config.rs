//! Run-wide configuration with environment overrides.

use crate::execution::DEFAULT_MAX_OUTPUT_BYTES;
use crate::pipeline::{ActivityOptions, LocalDispatcher};
use std::path::PathBuf;
use tracing::warn;

/// Log directory used when nothing else names one.
pub const DEFAULT_LOG_DIR: &str = "logs";
/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Queue identifier used when none is configured.
pub const DEFAULT_TASK_QUEUE: &str = "orchestration";

/// Environment variable overriding the log directory.
pub const ENV_LOG_DIR: &str = "STEPFLOW_LOG_DIR";
/// Environment variable overriding the in-memory output cap.
pub const ENV_LOG_MAX_BYTES: &str = "STEPFLOW_LOG_MAX_BYTES";
/// Environment variable overriding the namespace.
pub const ENV_NAMESPACE: &str = "STEPFLOW_NAMESPACE";
/// Environment variable overriding the queue identifier.
pub const ENV_TASK_QUEUE: &str = "STEPFLOW_TASK_QUEUE";

/// Knobs shared by every run of a process.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Log directory when the plan names none.
    pub log_dir: PathBuf,
    /// Cap on the in-memory stdout/stderr copy of each step.
    pub max_output_bytes: usize,
    /// Namespace scoping checkpoints.
    pub namespace: String,
    /// Queue identifier recorded with each run.
    pub task_queue: String,
    /// Default per-step timeout and retry policy.
    pub activity: ActivityOptions,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            namespace: DEFAULT_NAMESPACE.to_string(),
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            activity: ActivityOptions::default(),
        }
    }
}

impl RunnerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `STEPFLOW_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    /// Empty values are ignored, as are non-positive or unparsable byte caps.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(ENV_LOG_DIR) {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(raw) = get(ENV_LOG_MAX_BYTES) {
            match raw.parse::<usize>() {
                Ok(max) if max > 0 => config.max_output_bytes = max,
                _ => warn!(variable = ENV_LOG_MAX_BYTES, value = %raw, "Ignoring invalid output cap"),
            }
        }
        if let Some(namespace) = get(ENV_NAMESPACE) {
            config.namespace = namespace;
        }
        if let Some(queue) = get(ENV_TASK_QUEUE) {
            config.task_queue = queue;
        }
        config
    }

    /// Sets the log directory.
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Sets the in-memory output cap.
    #[must_use]
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the queue identifier.
    #[must_use]
    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = task_queue.into();
        self
    }

    /// Sets the default activity options.
    #[must_use]
    pub fn with_activity(mut self, activity: ActivityOptions) -> Self {
        self.activity = activity;
        self
    }

    /// An in-process dispatcher honoring this configuration.
    #[must_use]
    pub fn local_dispatcher(&self) -> LocalDispatcher {
        LocalDispatcher::new().with_max_output_bytes(self.max_output_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.max_output_bytes, 10_000);
        assert_eq!(config.namespace, "default");
        assert_eq!(config.task_queue, "orchestration");
        assert_eq!(config.activity.timeout, Duration::from_secs(7200));
        assert_eq!(config.activity.retry.max_attempts, 3);
    }

    #[test]
    fn test_env_overrides() {
        let config = RunnerConfig::from_lookup(lookup(&[
            (ENV_LOG_DIR, "/var/log/stepflow"),
            (ENV_LOG_MAX_BYTES, "2048"),
            (ENV_NAMESPACE, "ci"),
            (ENV_TASK_QUEUE, "  "),
        ]));
        assert_eq!(config.log_dir, PathBuf::from("/var/log/stepflow"));
        assert_eq!(config.max_output_bytes, 2048);
        assert_eq!(config.namespace, "ci");
        assert_eq!(config.task_queue, DEFAULT_TASK_QUEUE);
    }

    #[test]
    fn test_invalid_byte_cap_is_ignored() {
        for raw in ["0", "-5", "lots"] {
            let config = RunnerConfig::from_lookup(lookup(&[(ENV_LOG_MAX_BYTES, raw)]));
            assert_eq!(config.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
        }
    }

    #[test]
    fn test_builders() {
        let config = RunnerConfig::new()
            .with_log_dir("out")
            .with_max_output_bytes(10)
            .with_namespace("ns")
            .with_task_queue("q")
            .with_activity(ActivityOptions::default().with_timeout(Duration::from_secs(1)));
        assert_eq!(config.log_dir, PathBuf::from("out"));
        assert_eq!(config.activity.timeout, Duration::from_secs(1));
        assert_eq!(config.task_queue, "q");
    }
}
