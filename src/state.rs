//! Interaction state: the two small machines the view layer renders.
//!
//! Both machines are plain values. A transition takes the current snapshot and
//! an event and returns the next snapshot; illegal transitions leave the
//! snapshot unchanged. Coordinators publish snapshots through
//! [`Publisher`](crate::epoch::Publisher); the view only ever reads the
//! latest one.

use crate::epoch::Epoched;
use crate::models::{Fingerprint, SearchMode};

// ============ Upload ============

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UploadState {
    #[default]
    Idle,
    Hashing,
    Uploading,
    Done {
        message: String,
    },
    Failed {
        reason: String,
    },
}

impl UploadState {
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::Hashing => "hashing",
            UploadState::Uploading => "uploading",
            UploadState::Done { .. } => "done",
            UploadState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Done { .. } | UploadState::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    Hashed { fingerprint: Fingerprint },
    Acknowledged { message: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadSnapshot {
    pub epoch: u64,
    pub state: UploadState,
    pub file_name: Option<String>,
    pub fingerprint: Option<Fingerprint>,
}

impl Epoched for UploadSnapshot {
    fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl UploadSnapshot {
    /// `Idle -> Hashing` on a new selection. Everything shown for the
    /// previous file is dropped.
    pub fn selected(epoch: u64, file_name: impl Into<String>) -> Self {
        Self {
            epoch,
            state: UploadState::Hashing,
            file_name: Some(file_name.into()),
            fingerprint: None,
        }
    }

    pub fn apply(mut self, event: UploadEvent) -> Self {
        let next = match (&self.state, event) {
            (UploadState::Hashing, UploadEvent::Hashed { fingerprint }) => {
                self.fingerprint = Some(fingerprint);
                UploadState::Uploading
            }
            (UploadState::Uploading, UploadEvent::Acknowledged { message }) => {
                UploadState::Done { message }
            }
            (UploadState::Hashing | UploadState::Uploading, UploadEvent::Failed { reason }) => {
                UploadState::Failed { reason }
            }
            (state, event) => {
                tracing::debug!(state = state.name(), ?event, "ignoring illegal upload transition");
                return self;
            }
        };
        self.state = next;
        self
    }

    pub fn transition(&mut self, event: UploadEvent) {
        *self = std::mem::take(self).apply(event);
    }

    /// The file-selection control is disabled while bytes are on the wire.
    pub fn selection_enabled(&self) -> bool {
        !matches!(self.state, UploadState::Uploading)
    }

    pub fn status_line(&self) -> Option<String> {
        match &self.state {
            UploadState::Idle => None,
            UploadState::Hashing => Some("Calculating hash...".to_string()),
            UploadState::Uploading => Some("Uploading...".to_string()),
            UploadState::Done { message } if message.is_empty() => {
                Some("File uploaded successfully!".to_string())
            }
            UploadState::Done { message } => {
                Some(format!("File uploaded successfully! {}", message))
            }
            // no fingerprint means the failure happened before upload began
            UploadState::Failed { .. } if self.fingerprint.is_none() => {
                Some("Failed to calculate hash.".to_string())
            }
            UploadState::Failed { reason } => Some(format!("Upload failed: {}", reason)),
        }
    }

    pub fn file_line(&self) -> Option<String> {
        self.file_name
            .as_ref()
            .map(|name| format!("Selected file: {}", name))
    }
}

// ============ Search ============

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SearchState {
    #[default]
    Idle,
    Streaming,
    Done,
    Failed {
        reason: String,
    },
}

impl SearchState {
    pub fn name(&self) -> &'static str {
        match self {
            SearchState::Idle => "idle",
            SearchState::Streaming => "streaming",
            SearchState::Done => "done",
            SearchState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchState::Done | SearchState::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// The normalized accumulator after a chunk.
    Progress { text: String },
    Finished { text: String },
    Failed {
        reason: String,
        /// Partial text to keep on display, if configured to preserve it.
        partial: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchSnapshot {
    pub epoch: u64,
    pub state: SearchState,
    pub query: Option<String>,
    pub mode: SearchMode,
    /// Displayed result entries. One entry while streaming or done; a
    /// synthetic `Error: ...` entry on failure.
    pub results: Vec<String>,
}

impl Epoched for SearchSnapshot {
    fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl SearchSnapshot {
    /// `Idle -> Streaming` with a cleared accumulator.
    pub fn started(epoch: u64, query: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            epoch,
            state: SearchState::Streaming,
            query: Some(query.into()),
            mode,
            results: Vec::new(),
        }
    }

    pub fn apply(mut self, event: SearchEvent) -> Self {
        let (next, results) = match (&self.state, event) {
            (SearchState::Streaming, SearchEvent::Progress { text }) => {
                (SearchState::Streaming, single(text))
            }
            (SearchState::Streaming, SearchEvent::Finished { text }) => {
                (SearchState::Done, single(text))
            }
            (SearchState::Streaming, SearchEvent::Failed { reason, partial }) => {
                let mut results: Vec<String> =
                    partial.into_iter().filter(|p| !p.is_empty()).collect();
                results.push(format!("Error: {}", reason));
                (SearchState::Failed { reason }, results)
            }
            (state, event) => {
                tracing::debug!(state = state.name(), ?event, "ignoring illegal search transition");
                return self;
            }
        };
        self.state = next;
        self.results = results;
        self
    }

    pub fn transition(&mut self, event: SearchEvent) {
        *self = std::mem::take(self).apply(event);
    }

    /// Whether the submit control should be enabled for `query`.
    pub fn can_submit(&self, query: &str) -> bool {
        self.state != SearchState::Streaming && !query.trim().is_empty()
    }

    /// Lines the view shows in the results panel.
    pub fn display_lines(&self) -> Vec<String> {
        let streaming = self.state == SearchState::Streaming;
        let mut lines = Vec::new();
        if self.results.is_empty() && !streaming {
            lines.push("No results yet.".to_string());
        }
        lines.extend(self.results.iter().cloned());
        if streaming {
            lines.push("Loading...".to_string());
        }
        lines
    }

    /// The current result text, or `""` before anything arrived.
    pub fn text(&self) -> &str {
        self.results.first().map(String::as_str).unwrap_or("")
    }
}

fn single(text: String) -> Vec<String> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![text]
    }
}
