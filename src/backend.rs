//! The request/response seam between the coordinators and the backend.
//!
//! [`Backend`] is the narrow contract the core depends on: upload one file
//! with its fingerprint, and open one search stream. [`HttpBackend`] is the
//! reqwest implementation used by the `rag` binary. Tests substitute their
//! own implementations.
//!
//! # Endpoints
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | `POST` | `/upload` | multipart `file` + `hash` | text, or JSON `{ "message": ... }` |
//! | `POST` | `/search` | JSON `{ query, searchType, hash? }` | chunked text, or JSON `{ "result": ... }` |

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};

use crate::config::BackendConfig;
use crate::error::Failure;
use crate::models::{FileBuffer, Fingerprint, SearchRequest, ServerAck};

/// Lazy, finite, non-restartable sequence of response body chunks.
pub type ChunkStream = BoxStream<'static, Result<Bytes, Failure>>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Transmit a file and its fingerprint; resolve the acknowledgement.
    async fn upload(&self, file: &FileBuffer, fingerprint: &Fingerprint)
        -> Result<ServerAck, Failure>;

    /// Issue a search and return its body as a chunk stream.
    ///
    /// A non-success status is reported here, before any chunk is read.
    async fn search(&self, request: &SearchRequest) -> Result<ChunkStream, Failure>;
}

/// HTTP implementation of [`Backend`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    upload_url: String,
    search_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            upload_url: config.upload_url(),
            search_url: config.search_url(),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn upload(
        &self,
        file: &FileBuffer,
        fingerprint: &Fingerprint,
    ) -> Result<ServerAck, Failure> {
        let part = Part::bytes(file.bytes.to_vec())
            .file_name(file.name.clone())
            .mime_str(&file.media_type)
            .map_err(|e| Failure::Transport(format!("invalid media type: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("hash", fingerprint.to_string());

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::server(status));
        }

        let body = response.bytes().await?;
        Ok(ServerAck::parse(&body))
    }

    async fn search(&self, request: &SearchRequest) -> Result<ChunkStream, Failure> {
        let response = self
            .client
            .post(&self.search_url)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::server(status));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            // Non-streaming variant: the whole answer is one chunk
            let body = response.bytes().await?;
            let text = parse_result_body(&body)?;
            return Ok(stream::once(async move { Ok(Bytes::from(text)) }).boxed());
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Failure::from))
            .boxed())
    }
}

/// Extract the answer from a `{ "result": ... }` search response.
///
/// A string result is used verbatim; any other JSON value is rendered as
/// compact JSON.
pub fn parse_result_body(body: &[u8]) -> Result<String, Failure> {
    let json: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| Failure::Transport(format!("invalid search response: {}", e)))?;
    match json.get("result") {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(Failure::Transport(
            "invalid search response: missing result field".to_string(),
        )),
    }
}
