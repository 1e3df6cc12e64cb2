//! Upload and search progress reporting.
//!
//! Reports state transitions of the two machines so users see what the
//! client is doing while a file hashes or a response streams in. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use tokio::sync::watch;

use crate::state::{SearchSnapshot, SearchState, UploadSnapshot, UploadState};

/// A single reportable transition.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    Upload(UploadSnapshot),
    Search(SearchSnapshot),
}

impl ProgressEvent {
    /// Name of the state the event moved into.
    pub fn state_name(&self) -> &'static str {
        match self {
            ProgressEvent::Upload(s) => s.state.name(),
            ProgressEvent::Search(s) => s.state.name(),
        }
    }
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait StateReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Human-friendly progress on stderr: "upload  hashing  report.pdf".
pub struct StderrProgress;

impl StateReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let line = match event {
            ProgressEvent::Upload(s) => {
                let file = s.file_name.as_deref().unwrap_or("-");
                match &s.state {
                    UploadState::Failed { reason } => {
                        format!("upload  failed  {}: {}\n", file, reason)
                    }
                    state => format!("upload  {}  {}\n", state.name(), file),
                }
            }
            ProgressEvent::Search(s) => match &s.state {
                SearchState::Streaming => format!(
                    "search  streaming  {} chars\n",
                    format_number(s.text().chars().count() as u64)
                ),
                SearchState::Failed { reason } => format!("search  failed  {}\n", reason),
                state => format!("search  {}\n", state.name()),
            },
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl StateReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        let obj = match event {
            ProgressEvent::Upload(s) => serde_json::json!({
                "event": "upload",
                "epoch": s.epoch,
                "state": s.state.name(),
                "file": s.file_name,
                "hash": s.fingerprint.as_ref().map(|f| f.to_string()),
                "status": s.status_line(),
            }),
            ProgressEvent::Search(s) => serde_json::json!({
                "event": "search",
                "epoch": s.epoch,
                "state": s.state.name(),
                "mode": s.mode.as_str(),
                "chars": s.text().chars().count(),
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl StateReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn StateReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Report upload transitions until the sender is dropped.
///
/// Only state changes are reported; repeated snapshots in the same state
/// are skipped.
pub async fn watch_uploads(mut rx: watch::Receiver<UploadSnapshot>, reporter: &dyn StateReporter) {
    let mut last: Option<(u64, &'static str)> = None;
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        let key = (snapshot.epoch, snapshot.state.name());
        if last != Some(key) {
            last = Some(key);
            reporter.report(&ProgressEvent::Upload(snapshot));
        }
    }
}

/// Report search transitions until the sender is dropped.
///
/// While streaming, every chunk is reported so the character count moves.
pub async fn watch_searches(mut rx: watch::Receiver<SearchSnapshot>, reporter: &dyn StateReporter) {
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        reporter.report(&ProgressEvent::Search(snapshot));
    }
}
