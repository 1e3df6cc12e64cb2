//! Content fingerprinting.
//!
//! A fingerprint is the SHA-256 digest of a file's complete byte content,
//! hex-encoded. The backend uses it to recognize documents it has already
//! seen; the client only computes and attaches it.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::error::Failure;
use crate::models::Fingerprint;

/// Compute the fingerprint of an in-memory buffer.
pub fn compute_fingerprint(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Fingerprint::from_digest_hex(format!("{:x}", hasher.finalize()))
}

/// Compute a fingerprint on tokio's blocking pool.
///
/// Large files are CPU-bound to hash; running the digest off the cooperative
/// thread keeps snapshot updates flowing. A panicked or cancelled blocking
/// task surfaces as [`Failure::Hash`].
pub async fn fingerprint_async(bytes: Bytes) -> Result<Fingerprint, Failure> {
    tokio::task::spawn_blocking(move || compute_fingerprint(&bytes))
        .await
        .map_err(|e| Failure::hash(e.to_string()))
}

/// The hashing step of an upload.
///
/// The upload coordinator hashes through this trait so the step can be
/// substituted, e.g. held open in tests.
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, bytes: Bytes) -> Result<Fingerprint, Failure>;
}

/// SHA-256 on the blocking pool, via [`fingerprint_async`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprinter;

#[async_trait]
impl Fingerprinter for Sha256Fingerprinter {
    async fn fingerprint(&self, bytes: Bytes) -> Result<Fingerprint, Failure> {
        fingerprint_async(bytes).await
    }
}
