//! Reading and summarizing `events.jsonl`.
//!
//! Unparsable lines are skipped silently; the log may be appended to while it
//! is being read, so a torn final line is expected.

use super::record::{EventStatus, LifecycleEvent};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Reads every parsable event in the file. A missing file yields no events.
pub fn read_events(path: &Path) -> io::Result<Vec<LifecycleEvent>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        if let Some(event) = parse_line(&line?) {
            events.push(event);
        }
    }
    Ok(events)
}

fn parse_line(line: &str) -> Option<LifecycleEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// A run seen in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Workflow id.
    pub workflow_id: String,
    /// Run id.
    pub run_id: String,
    /// Latest event timestamp of the run.
    pub last_timestamp: String,
}

/// Distinct runs in the log, newest first.
#[must_use]
pub fn list_runs(events: &[LifecycleEvent]) -> Vec<RunSummary> {
    let mut runs: HashMap<(&str, &str), &str> = HashMap::new();
    for event in events {
        if event.workflow_id.is_empty() || event.run_id.is_empty() {
            continue;
        }
        let last = runs
            .entry((event.workflow_id.as_str(), event.run_id.as_str()))
            .or_insert(event.timestamp.as_str());
        if event.timestamp.as_str() > *last {
            *last = event.timestamp.as_str();
        }
    }

    let mut summaries: Vec<RunSummary> = runs
        .into_iter()
        .map(|((workflow_id, run_id), last)| RunSummary {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
            last_timestamp: last.to_string(),
        })
        .collect();
    summaries.sort_by(|a, b| {
        b.last_timestamp
            .cmp(&a.last_timestamp)
            .then_with(|| a.workflow_id.cmp(&b.workflow_id))
            .then_with(|| a.run_id.cmp(&b.run_id))
    });
    summaries
}

/// Events of one run, in log order.
#[must_use]
pub fn events_for_run(events: &[LifecycleEvent], workflow_id: &str, run_id: &str) -> Vec<LifecycleEvent> {
    events
        .iter()
        .filter(|e| e.belongs_to(workflow_id, run_id))
        .cloned()
        .collect()
}

/// How far a step has progressed according to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepProgress {
    /// A start event was seen but no finish.
    Started,
    /// A finish event was seen.
    Finished,
}

/// Per-step view of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    /// Step id.
    pub step_id: String,
    /// Progress.
    pub progress: StepProgress,
    /// Exit code of the last finish event.
    pub exit_code: Option<i32>,
    /// Duration of the last finish event.
    pub duration_secs: Option<f64>,
    /// Raw stdout log.
    pub stdout_path: Option<PathBuf>,
    /// Raw stderr log.
    pub stderr_path: Option<PathBuf>,
    /// Structured log.
    pub structured_path: Option<PathBuf>,
}

/// Key used for events carrying neither a step id nor a name.
const UNKNOWN_STEP: &str = "unknown";

/// Summarizes each step of a run, in order of first appearance.
///
/// A finish event wins over any start event, including a start from a later
/// retry.
#[must_use]
pub fn step_summaries(events: &[LifecycleEvent], workflow_id: &str, run_id: &str) -> Vec<StepSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut steps: HashMap<String, StepSummary> = HashMap::new();

    for event in events.iter().filter(|e| e.belongs_to(workflow_id, run_id)) {
        let key = [&event.step_id, &event.step_name]
            .into_iter()
            .find(|k| !k.is_empty())
            .map_or_else(|| UNKNOWN_STEP.to_string(), Clone::clone);
        let summary = steps.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            StepSummary {
                step_id: key,
                progress: StepProgress::Started,
                exit_code: None,
                duration_secs: None,
                stdout_path: None,
                stderr_path: None,
                structured_path: event.structured_path.clone(),
            }
        });

        if event.status == EventStatus::StepFinished {
            summary.progress = StepProgress::Finished;
            summary.exit_code = event.exit_code;
            summary.duration_secs = event.duration_secs;
            summary.stdout_path.clone_from(&event.stdout_path);
            summary.stderr_path.clone_from(&event.stderr_path);
            summary.structured_path.clone_from(&event.structured_path);
        }
    }

    order
        .into_iter()
        .filter_map(|id| steps.remove(&id))
        .collect()
}

/// Incremental reader that returns events appended since the last poll.
#[derive(Debug)]
pub struct EventFollower {
    path: PathBuf,
    offset: u64,
    pending: String,
}

impl EventFollower {
    /// Follows from the beginning of the file.
    #[must_use]
    pub fn from_start(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            pending: String::new(),
        }
    }

    /// Follows from the current end of the file.
    pub fn from_end(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let offset = std::fs::metadata(&path)?.len();
        Ok(Self {
            path,
            offset,
            pending: String::new(),
        })
    }

    /// Returns complete events appended since the last call.
    ///
    /// A trailing line without a newline is held back until it completes.
    pub fn poll(&mut self) -> io::Result<Vec<LifecycleEvent>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let len = file.metadata()?.len();
        if len < self.offset {
            // Truncated or replaced; start over.
            self.offset = 0;
            self.pending.clear();
        }
        file.seek(SeekFrom::Start(self.offset))?;

        let mut chunk = Vec::new();
        let read = file.read_to_end(&mut chunk)?;
        self.offset += read as u64;
        self.pending.push_str(&String::from_utf8_lossy(&chunk));

        let mut events = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        Ok(events)
    }
}
