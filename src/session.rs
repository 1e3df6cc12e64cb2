//! One user's upload and search coordinators, wired together.
//!
//! The only coupling between the two machines is the fingerprint: a search
//! run through the session carries the last computed fingerprint as optional
//! context, whether or not that file's upload went on to succeed.

use anyhow::Result;
use std::sync::Arc;

use crate::backend::{Backend, HttpBackend};
use crate::config::Config;
use crate::models::{FileBuffer, Fingerprint, SearchMode, SearchOutcome, UploadOutcome};
use crate::present::{present, Presented};
use crate::search::QueryStreamConsumer;
use crate::upload::UploadCoordinator;

pub struct Session {
    uploads: UploadCoordinator,
    searches: QueryStreamConsumer,
}

impl Session {
    /// Build a session talking HTTP to the configured backend.
    pub fn new(config: &Config) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&config.backend)?);
        Ok(Self::with_backend(backend, config))
    }

    pub fn with_backend(backend: Arc<dyn Backend>, config: &Config) -> Self {
        Self {
            uploads: UploadCoordinator::new(backend.clone(), config),
            searches: QueryStreamConsumer::new(backend, config),
        }
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    pub fn searches(&self) -> &QueryStreamConsumer {
        &self.searches
    }

    pub async fn select_file(&self, file: FileBuffer) -> UploadOutcome {
        self.uploads.select_file(file).await
    }

    /// Search with the last computed fingerprint as context.
    pub async fn search(&self, query: &str, mode: SearchMode) -> SearchOutcome {
        let fingerprint = self.uploads.last_fingerprint();
        self.searches.submit(query, mode, fingerprint).await
    }

    /// Search with an explicit fingerprint, or none.
    pub async fn search_with(
        &self,
        query: &str,
        mode: SearchMode,
        fingerprint: Option<Fingerprint>,
    ) -> SearchOutcome {
        self.searches.submit(query, mode, fingerprint).await
    }

    /// The current search result, highlighted for its own query and mode.
    pub fn presented(&self) -> Presented {
        let snapshot = self.searches.snapshot();
        let text = snapshot.results.join("\n");
        present(&text, snapshot.mode, snapshot.query.as_deref().unwrap_or(""))
    }
}
