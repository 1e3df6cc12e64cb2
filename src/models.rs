//! Core data models used throughout the client.
//!
//! These types represent the file being uploaded, its fingerprint, the search
//! request sent to the backend, and the terminal outcomes of both pipelines.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Raw bytes of a selected document plus its declared name and media type.
///
/// Immutable once read. Cloning is cheap: the bytes are reference-counted.
#[derive(Debug, Clone)]
pub struct FileBuffer {
    pub name: String,
    pub media_type: String,
    pub bytes: bytes::Bytes,
}

impl FileBuffer {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<bytes::Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file fully into memory.
    ///
    /// The declared name is the path's file name; the media type is guessed
    /// from the extension.
    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let media_type = media_type_for(&name).to_string();
        Ok(Self::new(name, media_type, bytes))
    }

    /// Lowercased extension of the declared name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Guess a media type from a file name's extension.
pub fn media_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("html") | Some("htm") => "text/html",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        _ => "application/octet-stream",
    }
}

/// Deterministic content digest of a [`FileBuffer`] (64 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub(crate) fn from_digest_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = anyhow::Error;

    /// Parse a fingerprint supplied by the user (e.g. `rag search --hash`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("fingerprint must be 64 hex characters, got '{}'", s);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

/// How the backend should interpret a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Meaning/embedding similarity.
    #[default]
    Semantic,
    /// Literal/lexical matching, highlighted client-side.
    Keyword,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Keyword => "keyword",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "semantic" => Ok(SearchMode::Semantic),
            "keyword" => Ok(SearchMode::Keyword),
            other => anyhow::bail!("Unknown search mode: {}. Use semantic or keyword.", other),
        }
    }
}

/// Body of `POST /search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(rename = "searchType")]
    pub mode: SearchMode,
    #[serde(rename = "hash", skip_serializing_if = "Option::is_none", default)]
    pub fingerprint: Option<Fingerprint>,
}

/// The upload endpoint's acknowledgement, resolved once at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAck {
    Text(String),
    Json { message: String },
}

impl ServerAck {
    /// Normalize a success body into an acknowledgement.
    ///
    /// A JSON object with a string `message` field becomes [`ServerAck::Json`];
    /// anything else is treated as plain text.
    pub fn parse(body: &[u8]) -> Self {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(body) {
            if let Some(serde_json::Value::String(message)) = map.get("message") {
                return ServerAck::Json {
                    message: message.clone(),
                };
            }
        }
        ServerAck::Text(String::from_utf8_lossy(body).trim().to_string())
    }

    pub fn message(&self) -> &str {
        match self {
            ServerAck::Text(text) => text,
            ServerAck::Json { message } => message,
        }
    }
}

/// Terminal result of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success { server_message: String },
    Failure { reason: String },
    /// The file was refused before any transition (e.g. unsupported type).
    Rejected { reason: String },
    /// A later selection took over; nothing was published for this attempt.
    Superseded,
}

/// Terminal result of one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Done { text: String },
    Failed { reason: String },
    /// The query was rejected before any request (empty or whitespace-only).
    Rejected,
    /// A later search took over; nothing was published for this one.
    Superseded,
}
