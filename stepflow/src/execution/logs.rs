//! Per-step log capture.
//!
//! Every byte a step writes to stdout or stderr goes three places: a capped
//! in-memory buffer returned to the scheduler, the raw per-stream log file,
//! and the structured JSONL log (one record per complete line). Logging never
//! fails a step: when a directory or file cannot be created, capture falls
//! back to a fixed temporary directory and finally to memory only, noting
//! the failure in the captured stderr.

use crate::core::RunIdentity;
use crate::utils::iso_timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Directory name used under the system temp dir when the configured log
/// directory is unusable.
pub const FALLBACK_DIR_NAME: &str = "stepflow-logs";

/// Default cap on in-memory stdout/stderr, in bytes.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10_000;

/// The fixed fallback log directory.
#[must_use]
pub fn fallback_log_dir() -> PathBuf {
    std::env::temp_dir().join(FALLBACK_DIR_NAME)
}

/// Makes `hint` absolute (relative to the current directory) and creates it.
///
/// If it cannot be created, the fallback directory is created and returned
/// instead.
#[must_use]
pub fn resolve_log_dir(hint: &Path) -> PathBuf {
    let dir = if hint.is_absolute() {
        hint.to_path_buf()
    } else {
        std::env::current_dir().map_or_else(|_| hint.to_path_buf(), |cwd| cwd.join(hint))
    };

    match std::fs::create_dir_all(&dir) {
        Ok(()) => dir,
        Err(err) => {
            let fallback = fallback_log_dir();
            warn!(
                log_dir = %dir.display(),
                fallback = %fallback.display(),
                error = %err,
                "Log directory unusable, falling back"
            );
            if let Err(err) = std::fs::create_dir_all(&fallback) {
                warn!(fallback = %fallback.display(), error = %err, "Fallback log directory unusable");
            }
            fallback
        }
    }
}

/// Replaces path separators and spaces so a value is safe in a file name.
#[must_use]
pub fn safe_name(value: &str) -> String {
    value.trim().replace(['/', '\\', ' '], "_")
}

/// File-name prefix for a step's logs: `<workflow>_<run>_<step>`.
///
/// Empty parts are omitted; the step name stands in for a missing step id,
/// and `step` is used when everything is empty.
#[must_use]
pub fn log_prefix(identity: &RunIdentity, step_id: &str, step_name: &str) -> String {
    let mut prefix = safe_name(&identity.workflow_id);
    let run = safe_name(&identity.run_id);
    if !run.is_empty() {
        prefix.push('_');
        prefix.push_str(&run);
    }
    let step = if step_id.is_empty() {
        safe_name(step_name)
    } else {
        safe_name(step_id)
    };
    if !step.is_empty() {
        prefix.push('_');
        prefix.push_str(&step);
    }
    if prefix.is_empty() {
        prefix.push_str("step");
    }
    prefix
}

/// Output stream of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl Stream {
    /// Stream name as used in file names and records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of the structured log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredLogLine {
    /// When the line was recorded.
    pub timestamp: String,
    /// Workflow id of the run.
    pub workflow_id: String,
    /// Run id of the run.
    pub run_id: String,
    /// Step id.
    pub step_id: String,
    /// Step name.
    pub step_name: String,
    /// Source stream.
    pub stream: Stream,
    /// Line text without the newline or a trailing carriage return.
    pub message: String,
    /// True when the line was flushed without a trailing newline.
    pub partial: bool,
}

/// Writer for the structured log, shared by both streams of a step.
#[derive(Debug)]
struct StructuredSink {
    file: Mutex<File>,
    failed: AtomicBool,
    identity: RunIdentity,
    step_id: String,
    step_name: String,
}

impl StructuredSink {
    fn write(&self, stream: Stream, message: String, partial: bool) {
        if self.failed.load(Ordering::Relaxed) {
            return;
        }
        let line = StructuredLogLine {
            timestamp: iso_timestamp(),
            workflow_id: self.identity.workflow_id.clone(),
            run_id: self.identity.run_id.clone(),
            step_id: self.step_id.clone(),
            step_name: self.step_name.clone(),
            stream,
            message,
            partial,
        };
        let Ok(mut data) = serde_json::to_vec(&line) else {
            return;
        };
        data.push(b'\n');
        if let Err(err) = self.file.lock().write_all(&data) {
            warn!(step_id = %self.step_id, error = %err, "Structured log write failed");
            self.failed.store(true, Ordering::Relaxed);
        }
    }
}

/// Splits a byte stream into lines, holding back an incomplete tail.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Feeds bytes and returns every line completed by them.
    pub fn push(&mut self, mut bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(idx) = bytes.iter().position(|b| *b == b'\n') {
            self.buf.extend_from_slice(&bytes[..idx]);
            lines.push(Self::take_line(&mut self.buf));
            bytes = &bytes[idx + 1..];
        }
        self.buf.extend_from_slice(bytes);
        lines
    }

    /// Returns the incomplete tail, if any, and clears it.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(Self::take_line(&mut self.buf))
        }
    }

    fn take_line(buf: &mut Vec<u8>) -> String {
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        let line = String::from_utf8_lossy(buf).into_owned();
        buf.clear();
        line
    }
}

/// Capture of one output stream of one step.
#[derive(Debug)]
pub struct StreamCapture {
    stream: Stream,
    memory: Vec<u8>,
    limit: usize,
    truncated: bool,
    raw: Option<File>,
    lines: LineBuffer,
    structured: Option<Arc<StructuredSink>>,
}

impl StreamCapture {
    fn new(stream: Stream, limit: usize) -> Self {
        Self {
            stream,
            memory: Vec::new(),
            limit,
            truncated: false,
            raw: None,
            lines: LineBuffer::default(),
            structured: None,
        }
    }

    /// Records bytes written by the step.
    pub fn write(&mut self, bytes: &[u8]) {
        self.remember(bytes);

        if let Some(raw) = self.raw.as_mut() {
            if let Err(err) = raw.write_all(bytes) {
                warn!(stream = %self.stream, error = %err, "Raw log write failed");
                self.raw = None;
            }
        }

        if let Some(sink) = &self.structured {
            for line in self.lines.push(bytes) {
                sink.write(self.stream, line, false);
            }
        }
    }

    /// Adds text to the in-memory copy only.
    fn note(&mut self, text: &str) {
        self.remember(text.as_bytes());
    }

    fn remember(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.memory.len());
        if bytes.len() > room {
            self.truncated = true;
        }
        self.memory.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn flush_partial(&mut self) {
        if let Some(sink) = &self.structured {
            if let Some(tail) = self.lines.take_partial() {
                sink.write(self.stream, tail, true);
            }
        }
        if let Some(raw) = self.raw.as_mut() {
            let _ = raw.flush();
        }
    }

    fn into_output(self) -> (String, bool) {
        (String::from_utf8_lossy(&self.memory).into_owned(), self.truncated)
    }
}

/// Paths of a step's log files; `None` where the file could not be created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPaths {
    /// Raw stdout log.
    pub stdout: Option<PathBuf>,
    /// Raw stderr log.
    pub stderr: Option<PathBuf>,
    /// Structured log.
    pub structured: Option<PathBuf>,
}

/// Everything captured from a finished step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// In-memory stdout, capped.
    pub stdout: String,
    /// In-memory stderr, capped.
    pub stderr: String,
    /// Whether stdout was capped.
    pub stdout_truncated: bool,
    /// Whether stderr was capped.
    pub stderr_truncated: bool,
    /// Log file paths.
    pub paths: LogPaths,
}

/// The open log sinks of one step execution.
///
/// Dropping it closes every file; [`StepLogs::finish`] additionally flushes
/// incomplete trailing lines as partial structured records.
#[derive(Debug)]
pub struct StepLogs {
    stdout: StreamCapture,
    stderr: StreamCapture,
    paths: LogPaths,
}

impl StepLogs {
    /// Opens the three log files of a step under `log_dir`.
    ///
    /// Never fails: a file that cannot be created in `log_dir` is retried in
    /// the fallback directory, and if that also fails the failure is noted in
    /// the captured stderr and that sink is skipped.
    #[must_use]
    pub fn open(
        log_dir: &Path,
        identity: &RunIdentity,
        step_id: &str,
        step_name: &str,
        max_output_bytes: usize,
    ) -> Self {
        Self::open_with_fallback(
            log_dir,
            &fallback_log_dir(),
            identity,
            step_id,
            step_name,
            max_output_bytes,
        )
    }

    fn open_with_fallback(
        log_dir: &Path,
        fallback: &Path,
        identity: &RunIdentity,
        step_id: &str,
        step_name: &str,
        max_output_bytes: usize,
    ) -> Self {
        let prefix = log_prefix(identity, step_id, step_name);
        let mut logs = Self {
            stdout: StreamCapture::new(Stream::Stdout, max_output_bytes),
            stderr: StreamCapture::new(Stream::Stderr, max_output_bytes),
            paths: LogPaths::default(),
        };

        match create_log_file(log_dir, fallback, &format!("{prefix}_stdout.log")) {
            Ok((path, file)) => {
                logs.stdout.raw = Some(file);
                logs.paths.stdout = Some(path);
            }
            Err(err) => logs.stderr.note(&format!("log write failed (stdout): {err}\n")),
        }
        match create_log_file(log_dir, fallback, &format!("{prefix}_stderr.log")) {
            Ok((path, file)) => {
                logs.stderr.raw = Some(file);
                logs.paths.stderr = Some(path);
            }
            Err(err) => logs.stderr.note(&format!("log write failed (stderr): {err}\n")),
        }
        match create_log_file(log_dir, fallback, &format!("{prefix}_structured.jsonl")) {
            Ok((path, file)) => {
                let sink = Arc::new(StructuredSink {
                    file: Mutex::new(file),
                    failed: AtomicBool::new(false),
                    identity: identity.clone(),
                    step_id: step_id.to_string(),
                    step_name: step_name.to_string(),
                });
                logs.stdout.structured = Some(Arc::clone(&sink));
                logs.stderr.structured = Some(sink);
                logs.paths.structured = Some(path);
            }
            Err(err) => logs.stderr.note(&format!("log write failed (structured): {err}\n")),
        }

        logs
    }

    /// Paths of the files that were opened.
    #[must_use]
    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    /// The stdout capture.
    pub fn stdout_mut(&mut self) -> &mut StreamCapture {
        &mut self.stdout
    }

    /// The stderr capture.
    pub fn stderr_mut(&mut self) -> &mut StreamCapture {
        &mut self.stderr
    }

    /// Both captures, for pumping the two streams concurrently.
    pub fn streams_mut(&mut self) -> (&mut StreamCapture, &mut StreamCapture) {
        (&mut self.stdout, &mut self.stderr)
    }

    /// Flushes partial lines, closes the files and returns the capture.
    #[must_use]
    pub fn finish(mut self) -> CapturedOutput {
        self.stdout.flush_partial();
        self.stderr.flush_partial();
        let (stdout, stdout_truncated) = self.stdout.into_output();
        let (stderr, stderr_truncated) = self.stderr.into_output();
        CapturedOutput {
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            paths: self.paths,
        }
    }
}

fn create_log_file(dir: &Path, fallback: &Path, file_name: &str) -> std::io::Result<(PathBuf, File)> {
    let path = dir.join(file_name);
    match File::create(&path) {
        Ok(file) => Ok((path, file)),
        Err(err) => {
            if fallback == dir {
                return Err(err);
            }
            warn!(path = %path.display(), error = %err, "Log file unusable, trying fallback directory");
            std::fs::create_dir_all(fallback)?;
            let path = fallback.join(file_name);
            File::create(&path).map(|file| (path, file))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn identity() -> RunIdentity {
        RunIdentity::new("wf 1").with_run_id("run/2")
    }

    fn read_structured(path: &Path) -> Vec<StructuredLogLine> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_safe_name_and_prefix() {
        assert_eq!(safe_name("  a/b\\c d "), "a_b_c_d");
        assert_eq!(log_prefix(&identity(), "build", "Build it"), "wf_1_run_2_build");
        assert_eq!(log_prefix(&identity(), "", "Build it"), "wf_1_run_2_Build_it");
        let empty = RunIdentity::new("").with_run_id("");
        assert_eq!(log_prefix(&empty, "", ""), "step");
        assert_eq!(log_prefix(&empty, "x", ""), "_x");
    }

    #[test]
    fn test_line_buffer_splits_and_strips_cr() {
        let mut buf = LineBuffer::default();
        assert_eq!(buf.push(b"hel"), Vec::<String>::new());
        assert_eq!(buf.push(b"lo\r\nwor"), vec!["hello"]);
        assert_eq!(buf.push(b"ld\n\nx"), vec!["world", ""]);
        assert_eq!(buf.take_partial().as_deref(), Some("x"));
        assert_eq!(buf.take_partial(), None);
    }

    #[test]
    fn test_resolve_log_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c");
        assert_eq!(resolve_log_dir(&target), target);
        assert!(target.is_dir());
    }

    #[test]
    fn test_resolve_log_dir_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        assert_eq!(resolve_log_dir(&blocker.join("sub")), fallback_log_dir());
    }

    #[test]
    fn test_step_logs_capture_three_ways() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = StepLogs::open(dir.path(), &identity(), "s", "S", 100);
        logs.stdout_mut().write(b"one\ntw");
        logs.stderr_mut().write(b"oops\r\n");
        logs.stdout_mut().write(b"o\nthree");
        let out = logs.finish();

        assert_eq!(out.stdout, "one\ntwo\nthree");
        assert_eq!(out.stderr, "oops\r\n");
        assert!(!out.stdout_truncated);

        let stdout_path = out.paths.stdout.unwrap();
        assert_eq!(stdout_path, dir.path().join("wf_1_run_2_s_stdout.log"));
        assert_eq!(std::fs::read_to_string(stdout_path).unwrap(), "one\ntwo\nthree");

        let records = read_structured(&out.paths.structured.unwrap());
        let summary: Vec<_> = records
            .iter()
            .map(|r| (r.stream, r.message.as_str(), r.partial))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Stream::Stdout, "one", false),
                (Stream::Stderr, "oops", false),
                (Stream::Stdout, "two", false),
                (Stream::Stdout, "three", true),
            ]
        );
        assert_eq!(records[0].workflow_id, "wf 1");
        assert_eq!(records[0].step_name, "S");
    }

    #[test]
    fn test_memory_is_capped_but_raw_log_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = StepLogs::open(dir.path(), &identity(), "t", "t", 10);
        logs.stdout_mut().write(b"abcdefghijklmnopqrstuvwxyz");
        let out = logs.finish();

        assert_eq!(out.stdout, "abcdefghij");
        assert!(out.stdout_truncated);
        assert!(!out.stderr_truncated);
        let raw = std::fs::read_to_string(out.paths.stdout.unwrap()).unwrap();
        assert_eq!(raw.len(), 26);
    }

    #[test]
    fn test_unusable_log_dir_falls_back_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let identity = RunIdentity::new("wf-fallback");

        let mut logs = StepLogs::open(&blocker, &identity, "s", "s", 100);
        logs.stdout_mut().write(b"still logged\n");
        let out = logs.finish();

        let fallback = fallback_log_dir();
        let structured = out.paths.structured.clone().unwrap();
        assert!(structured.starts_with(&fallback));
        assert!(out.paths.stdout.as_ref().unwrap().starts_with(&fallback));
        assert!(out.paths.stderr.as_ref().unwrap().starts_with(&fallback));
        assert_eq!(out.stdout, "still logged\n");
        assert_eq!(out.stderr, "");

        let records = read_structured(&structured);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "still logged");
        assert_eq!(records[0].run_id, identity.run_id);

        for path in [out.paths.stdout, out.paths.stderr, out.paths.structured].into_iter().flatten() {
            let _ = std::fs::remove_file(path);
        }
    }

    #[test]
    fn test_unusable_fallback_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let mut logs = StepLogs::open_with_fallback(&blocker, &blocker.join("sub"), &identity(), "s", "s", 1000);
        logs.stdout_mut().write(b"kept in memory\n");
        let out = logs.finish();

        assert_eq!(out.paths, LogPaths::default());
        assert_eq!(out.stdout, "kept in memory\n");
        for sink in ["stdout", "stderr", "structured"] {
            assert!(
                out.stderr.contains(&format!("log write failed ({sink}):")),
                "missing note for {sink}: {}",
                out.stderr
            );
        }
    }

    #[test]
    fn test_failed_structured_write_disables_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read-only.jsonl");
        std::fs::write(&path, "").unwrap();
        let sink = Arc::new(StructuredSink {
            file: Mutex::new(File::open(&path).unwrap()),
            failed: AtomicBool::new(false),
            identity: identity(),
            step_id: "s".to_string(),
            step_name: "s".to_string(),
        });

        let mut capture = StreamCapture::new(Stream::Stdout, 100);
        capture.structured = Some(Arc::clone(&sink));
        capture.write(b"first\n");
        assert!(sink.failed.load(Ordering::Relaxed));
        capture.write(b"second\n");

        let (stdout, truncated) = capture.into_output();
        assert_eq!(stdout, "first\nsecond\n");
        assert!(!truncated);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_exact_limit_is_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let mut logs = StepLogs::open(dir.path(), &identity(), "t", "t", 4);
        logs.stdout_mut().write(b"ab");
        logs.stdout_mut().write(b"cd");
        let out = logs.finish();
        assert_eq!(out.stdout, "abcd");
        assert!(!out.stdout_truncated);
    }
}
