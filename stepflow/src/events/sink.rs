//! Event sink trait and implementations.

use super::record::LifecycleEvent;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};

/// File name of the run-level event log inside a log directory.
pub const EVENTS_FILE_NAME: &str = "events.jsonl";

/// Trait for sinks that receive step lifecycle events.
///
/// Sinks are shared by every step execution of a run and must serialize
/// their writes internally.
pub trait EventSink: Send + Sync {
    /// Appends an event.
    fn emit(&self, event: &LifecycleEvent) -> io::Result<()>;

    /// Appends an event, logging instead of returning failures.
    fn try_emit(&self, event: &LifecycleEvent) {
        if let Err(err) = self.emit(event) {
            warn!(
                step_id = %event.step_id,
                status = %event.status,
                error = %err,
                "Failed to append lifecycle event"
            );
        }
    }
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &LifecycleEvent) -> io::Result<()> {
        Ok(())
    }
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &LifecycleEvent) -> io::Result<()> {
        if self.level == Level::DEBUG {
            debug!(
                workflow_id = %event.workflow_id,
                run_id = %event.run_id,
                step_id = %event.step_id,
                exit_code = ?event.exit_code,
                "Event: {}", event.status
            );
        } else {
            info!(
                workflow_id = %event.workflow_id,
                run_id = %event.run_id,
                step_id = %event.step_id,
                exit_code = ?event.exit_code,
                "Event: {}", event.status
            );
        }
        Ok(())
    }
}

/// Append-only JSONL event log, one object per line.
///
/// The file is opened lazily in append mode on first write and kept open;
/// a single mutex serializes writers so lines never interleave.
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlEventLog {
    /// Creates a log that appends to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// Creates a log at `<dir>/events.jsonl`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(EVENTS_FILE_NAME))
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}

impl EventSink for JsonlEventLog {
    fn emit(&self, event: &LifecycleEvent) -> io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut guard = self.file.lock();
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        match guard.as_mut() {
            Some(file) => file.write_all(&line),
            None => Ok(()),
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<LifecycleEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the events of one step, in arrival order.
    #[must_use]
    pub fn events_for_step(&self, step_id: &str) -> Vec<LifecycleEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.step_id == step_id)
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &LifecycleEvent) -> io::Result<()> {
        self.events.write().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunIdentity, StepRunResult};
    use crate::events::EventStatus;
    use std::sync::Arc;

    fn identity() -> RunIdentity {
        RunIdentity::new("wf").with_run_id("r1")
    }

    #[test]
    fn test_noop_and_logging_sinks() {
        let event = LifecycleEvent::started(&identity(), "a", "a", None, "true");
        NoOpEventSink.try_emit(&event);
        LoggingEventSink::default().try_emit(&event);
        LoggingEventSink::debug().try_emit(&event);
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.try_emit(&LifecycleEvent::started(&identity(), "a", "a", None, "true"));
        sink.try_emit(&LifecycleEvent::started(&identity(), "b", "b", None, "true"));
        sink.try_emit(&LifecycleEvent::finished(
            &identity(),
            "a",
            &StepRunResult::default(),
        ));

        assert_eq!(sink.len(), 3);
        let a = sink.events_for_step("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[1].status, EventStatus::StepFinished);
    }

    #[test]
    fn test_jsonl_log_appends_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlEventLog::in_dir(dir.path());
        log.emit(&LifecycleEvent::started(&identity(), "a", "a", None, "true"))
            .unwrap();

        // A second handle on the same file must append after the first.
        let other = JsonlEventLog::in_dir(dir.path());
        other
            .emit(&LifecycleEvent::started(&identity(), "b", "b", None, "true"))
            .unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: LifecycleEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.step_id, "a");
    }

    #[test]
    fn test_jsonl_log_concurrent_writers_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(JsonlEventLog::in_dir(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let step = format!("s{i}-{j}");
                        log.emit(&LifecycleEvent::started(&identity(), &step, &step, None, "x"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = std::fs::read_to_string(log.path()).unwrap();
        let parsed: Vec<LifecycleEvent> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 200);
    }

    #[test]
    fn test_jsonl_log_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let log = JsonlEventLog::in_dir(&nested);
        log.emit(&LifecycleEvent::started(&identity(), "a", "a", None, "true"))
            .unwrap();
        assert!(nested.join(EVENTS_FILE_NAME).exists());
    }
}
