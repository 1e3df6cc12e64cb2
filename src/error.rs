//! Failure taxonomy for the upload and search state machines.
//!
//! Every failure is caught inside the machine that owns it and turned into a
//! terminal `Failed { reason }` state. The [`Display`](std::fmt::Display)
//! text of a [`Failure`] is exactly the reason string shown to the user.
//!
//! Ambient errors (config loading, reading files from disk, CLI plumbing)
//! use `anyhow` instead.

use std::time::Duration;
use thiserror::Error;

/// Why an upload or search ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// The digest could not be computed. Detail is logged, not displayed.
    #[error("hash computation failed")]
    Hash { detail: String },

    /// The request could not be sent or the response could not be read.
    #[error("{0}")]
    Transport(String),

    /// A response arrived with a non-success status.
    #[error("{status_text}")]
    Server { status: u16, status_text: String },

    /// Input rejected before any request was issued.
    #[error("{0}")]
    Validation(String),

    /// The operation exceeded its configured time budget.
    #[error("timed out after {}s", after.as_secs())]
    Timeout { after: Duration },
}

impl Failure {
    pub fn hash(detail: impl Into<String>) -> Self {
        Self::Hash {
            detail: detail.into(),
        }
    }

    /// Build a server failure from a status code.
    ///
    /// The status text is the canonical reason phrase, falling back to the
    /// numeric code for non-standard statuses.
    pub fn server(status: reqwest::StatusCode) -> Self {
        let status_text = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string());
        Self::Server {
            status: status.as_u16(),
            status_text,
        }
    }

    /// Short machine-readable name, used in JSON progress output.
    pub fn kind(&self) -> &'static str {
        match self {
            Failure::Hash { .. } => "hash",
            Failure::Transport(_) => "transport",
            Failure::Server { .. } => "server",
            Failure::Validation(_) => "validation",
            Failure::Timeout { .. } => "timeout",
        }
    }
}

impl From<reqwest::Error> for Failure {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if !status.is_success() => Failure::server(status),
            _ => Failure::Transport(err.to_string()),
        }
    }
}
