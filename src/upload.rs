//! Upload coordination: fingerprint a file, then send it with its fingerprint.
//!
//! ```text
//! Idle ──select──▶ Hashing ──hashed──▶ Uploading ──ack──▶ Done
//!                     │                    │
//!                     └──────failure───────┴────────────▶ Failed
//! ```
//!
//! A new selection at any point restarts the machine. The superseded attempt
//! is cancelled (its request future is dropped) and anything it would have
//! published is discarded by the epoch check in
//! [`Publisher::update`](crate::epoch::Publisher::update).

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::{Config, UploadConfig};
use crate::epoch::{Publisher, Ticket};
use crate::error::Failure;
use crate::fingerprint::{Fingerprinter, Sha256Fingerprinter};
use crate::models::{FileBuffer, Fingerprint, ServerAck, UploadOutcome};
use crate::state::{UploadEvent, UploadSnapshot};

pub struct UploadCoordinator {
    backend: Arc<dyn Backend>,
    hasher: Arc<dyn Fingerprinter>,
    publisher: Publisher<UploadSnapshot>,
    timeout: Duration,
    accepted: UploadConfig,
    /// Fingerprint of the most recent selection that finished hashing.
    last_fingerprint: Mutex<Option<Fingerprint>>,
}

impl UploadCoordinator {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            backend,
            hasher: Arc::new(Sha256Fingerprinter),
            publisher: Publisher::new(UploadSnapshot::default()),
            timeout: config.timeouts.upload(),
            accepted: config.upload.clone(),
            last_fingerprint: Mutex::new(None),
        }
    }

    /// Replace the hashing step.
    pub fn with_fingerprinter(mut self, hasher: Arc<dyn Fingerprinter>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.publisher.subscribe()
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        self.publisher.snapshot()
    }

    pub fn last_fingerprint(&self) -> Option<Fingerprint> {
        self.last_fingerprint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one upload for a newly selected file.
    ///
    /// Never returns an error: every failure becomes [`UploadOutcome::Failure`]
    /// and a published `Failed` state. Returns [`UploadOutcome::Superseded`]
    /// without touching the state if another selection took over meanwhile.
    pub async fn select_file(&self, file: FileBuffer) -> UploadOutcome {
        if !self.accepted.accepts(file.extension().as_deref()) {
            let failure = Failure::Validation(format!(
                "unsupported file type: {} (accepted: {})",
                file.name,
                self.accepted.accepted_extensions.join(", ")
            ));
            warn!(file = %file.name, "rejecting selection: {}", failure);
            return UploadOutcome::Rejected {
                reason: failure.to_string(),
            };
        }

        let ticket = self
            .publisher
            .begin(|epoch| UploadSnapshot::selected(epoch, file.name.clone()));
        info!(epoch = ticket.epoch, file = %file.name, bytes = file.len(), "file selected");

        let attempt = async {
            match tokio::time::timeout(self.timeout, self.hash_and_send(&ticket, &file)).await {
                Ok(result) => result,
                Err(_) => Some(Err(Failure::Timeout {
                    after: self.timeout,
                })),
            }
        };

        let result = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => None,
            result = attempt => result,
        };

        let Some(result) = result else {
            debug!(epoch = ticket.epoch, file = %file.name, "upload superseded");
            return UploadOutcome::Superseded;
        };

        match result {
            Ok(ack) => self.finish_success(&ticket, ack),
            Err(failure) => self.finish_failure(&ticket, failure),
        }
    }

    /// Hash, publish `Uploading`, transmit. `None` means superseded.
    async fn hash_and_send(
        &self,
        ticket: &Ticket,
        file: &FileBuffer,
    ) -> Option<Result<ServerAck, Failure>> {
        let fingerprint = match self.hasher.fingerprint(file.bytes.clone()).await {
            Ok(fp) => fp,
            Err(failure) => return Some(Err(failure)),
        };
        debug!(epoch = ticket.epoch, fingerprint = %fingerprint, "hash computed");

        let published = self.publisher.update(ticket, |s| {
            s.transition(UploadEvent::Hashed {
                fingerprint: fingerprint.clone(),
            });
            // recorded under the snapshot lock so a newer selection cannot be overwritten
            *self
                .last_fingerprint
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(fingerprint.clone());
        });
        if !published {
            return None;
        }

        Some(self.backend.upload(file, &fingerprint).await)
    }

    fn finish_success(&self, ticket: &Ticket, ack: ServerAck) -> UploadOutcome {
        let message = ack.message().to_string();
        let published = self.publisher.update(ticket, |s| {
            s.transition(UploadEvent::Acknowledged {
                message: message.clone(),
            })
        });
        if !published {
            return UploadOutcome::Superseded;
        }
        info!(epoch = ticket.epoch, message = %message, "upload done");
        UploadOutcome::Success {
            server_message: message,
        }
    }

    fn finish_failure(&self, ticket: &Ticket, failure: Failure) -> UploadOutcome {
        if let Failure::Hash { detail } = &failure {
            warn!(epoch = ticket.epoch, detail = %detail, "hash computation failed");
        }
        let reason = failure.to_string();
        let published = self.publisher.update(ticket, |s| {
            s.transition(UploadEvent::Failed {
                reason: reason.clone(),
            })
        });
        if !published {
            return UploadOutcome::Superseded;
        }
        warn!(epoch = ticket.epoch, kind = failure.kind(), "upload failed: {}", reason);
        UploadOutcome::Failure { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChunkStream;
    use crate::fingerprint::compute_fingerprint;
    use crate::models::SearchRequest;
    use crate::state::UploadState;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::Notify;

    /// Hashes normally, except that `held` input blocks until released.
    struct HeldHasher {
        held: &'static [u8],
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Fingerprinter for HeldHasher {
        async fn fingerprint(&self, bytes: Bytes) -> Result<Fingerprint, Failure> {
            if bytes.as_ref() == self.held {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(compute_fingerprint(&bytes))
        }
    }

    /// Upload backend whose responses are scripted per file name.
    struct ScriptedBackend {
        /// Released when a test wants the held upload to finish.
        release: Notify,
        hold: Option<String>,
        fail_with: Option<Failure>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedBackend {
        fn ok() -> Self {
            Self {
                release: Notify::new(),
                hold: None,
                fail_with: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn upload(
            &self,
            file: &FileBuffer,
            fingerprint: &Fingerprint,
        ) -> Result<ServerAck, Failure> {
            self.seen
                .lock()
                .unwrap()
                .push((file.name.clone(), fingerprint.to_string()));
            if self.hold.as_deref() == Some(file.name.as_str()) {
                self.release.notified().await;
            }
            if let Some(failure) = &self.fail_with {
                return Err(failure.clone());
            }
            Ok(ServerAck::Text(format!("stored {}", file.name)))
        }

        async fn search(&self, _request: &SearchRequest) -> Result<ChunkStream, Failure> {
            unreachable!("upload tests never search")
        }
    }

    fn pdf(name: &str, body: &[u8]) -> FileBuffer {
        FileBuffer::new(name, "application/pdf", body.to_vec())
    }

    #[tokio::test]
    async fn test_upload_success() {
        let backend = Arc::new(ScriptedBackend::ok());
        let coord = UploadCoordinator::new(backend.clone(), &Config::default());

        let outcome = coord.select_file(pdf("a.pdf", b"0123456789")).await;
        assert_eq!(
            outcome,
            UploadOutcome::Success {
                server_message: "stored a.pdf".into()
            }
        );

        let snap = coord.snapshot();
        let expected = compute_fingerprint(b"0123456789");
        assert_eq!(snap.fingerprint.as_ref(), Some(&expected));
        assert_eq!(coord.last_fingerprint(), Some(expected.clone()));
        assert_eq!(
            backend.seen.lock().unwrap().as_slice(),
            &[("a.pdf".to_string(), expected.to_string())]
        );
    }

    #[tokio::test]
    async fn test_server_failure_becomes_failed_state() {
        let mut backend = ScriptedBackend::ok();
        backend.fail_with = Some(Failure::server(reqwest::StatusCode::BAD_GATEWAY));
        let coord = UploadCoordinator::new(Arc::new(backend), &Config::default());

        let outcome = coord.select_file(pdf("a.pdf", b"x")).await;
        assert_eq!(
            outcome,
            UploadOutcome::Failure {
                reason: "Bad Gateway".into()
            }
        );
        assert_eq!(
            coord.snapshot().status_line().as_deref(),
            Some("Upload failed: Bad Gateway")
        );
        // the hash was computed before the upload failed
        assert_eq!(coord.last_fingerprint(), Some(compute_fingerprint(b"x")));
    }

    #[tokio::test]
    async fn test_unaccepted_type_is_rejected_without_transition() {
        let backend = Arc::new(ScriptedBackend::ok());
        let coord = UploadCoordinator::new(backend.clone(), &Config::default());

        let outcome = coord
            .select_file(FileBuffer::new("tool.exe", "application/octet-stream", vec![1]))
            .await;
        assert!(matches!(outcome, UploadOutcome::Rejected { .. }));
        assert_eq!(coord.snapshot(), UploadSnapshot::default());
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_selection_supersedes_inflight_upload() {
        let mut backend = ScriptedBackend::ok();
        backend.hold = Some("a.pdf".into());
        let backend = Arc::new(backend);
        let coord = Arc::new(UploadCoordinator::new(backend.clone(), &Config::default()));

        let first = tokio::spawn({
            let coord = coord.clone();
            async move { coord.select_file(pdf("a.pdf", b"first")).await }
        });

        // Wait until A is on the wire
        let mut rx = coord.subscribe();
        rx.wait_for(|s| s.state == UploadState::Uploading)
            .await
            .unwrap();
        assert!(!rx.borrow().selection_enabled());

        let second = coord.select_file(pdf("b.pdf", b"second")).await;
        assert_eq!(
            second,
            UploadOutcome::Success {
                server_message: "stored b.pdf".into()
            }
        );
        backend.release.notify_waiters();
        assert_eq!(first.await.unwrap(), UploadOutcome::Superseded);

        let snap = coord.snapshot();
        assert_eq!(snap.file_name.as_deref(), Some("b.pdf"));
        assert_eq!(snap.fingerprint, Some(compute_fingerprint(b"second")));
        assert_eq!(
            snap.state,
            UploadState::Done {
                message: "stored b.pdf".into()
            }
        );
        assert_eq!(coord.last_fingerprint(), Some(compute_fingerprint(b"second")));
    }

    #[tokio::test]
    async fn test_new_selection_supersedes_inflight_hash() {
        let backend = Arc::new(ScriptedBackend::ok());
        let hasher = Arc::new(HeldHasher {
            held: b"first",
            entered: Notify::new(),
            release: Notify::new(),
        });
        let coord = Arc::new(
            UploadCoordinator::new(backend.clone(), &Config::default())
                .with_fingerprinter(hasher.clone()),
        );
        let mut rx = coord.subscribe();

        let first = tokio::spawn({
            let coord = coord.clone();
            async move { coord.select_file(pdf("a.pdf", b"first")).await }
        });

        // A is stuck computing its hash
        hasher.entered.notified().await;
        assert_eq!(rx.borrow_and_update().state, UploadState::Hashing);

        let second = coord.select_file(pdf("b.pdf", b"second")).await;
        assert_eq!(
            second,
            UploadOutcome::Success {
                server_message: "stored b.pdf".into()
            }
        );
        hasher.release.notify_waiters();
        assert_eq!(first.await.unwrap(), UploadOutcome::Superseded);

        // A never reached the backend and left nothing behind
        assert_eq!(
            backend.seen.lock().unwrap().as_slice(),
            &[(
                "b.pdf".to_string(),
                compute_fingerprint(b"second").to_string()
            )]
        );
        let snap = coord.snapshot();
        assert_eq!(snap.epoch, 2);
        assert_eq!(snap.file_name.as_deref(), Some("b.pdf"));
        assert_eq!(snap.fingerprint, Some(compute_fingerprint(b"second")));
        assert_eq!(coord.last_fingerprint(), Some(compute_fingerprint(b"second")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_failure() {
        let mut backend = ScriptedBackend::ok();
        backend.hold = Some("slow.pdf".into());
        let mut config = Config::default();
        config.timeouts.upload_secs = 2;
        let coord = UploadCoordinator::new(Arc::new(backend), &config);

        let outcome = coord.select_file(pdf("slow.pdf", b"x")).await;
        assert_eq!(
            outcome,
            UploadOutcome::Failure {
                reason: "timed out after 2s".into()
            }
        );
    }
}
