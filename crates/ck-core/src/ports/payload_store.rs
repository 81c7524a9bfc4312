use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::history::{ContentDigest, PayloadStoreError};

/// Content-addressable storage for captured payloads, keyed by digest so
/// byte-identical payloads are stored exactly once.
#[async_trait]
pub trait PayloadStorePort: Send + Sync {
    /// Where the payload for `digest` lives (whether or not it exists yet).
    fn path_for(&self, digest: &ContentDigest) -> PathBuf;

    /// Copy a source file into the store under `digest`. Storing an
    /// already-present digest is a no-op returning the existing path;
    /// that no-op is the dedup mechanism.
    async fn store_file(&self, digest: &ContentDigest, source: &Path) -> Result<PathBuf>;

    /// Write in-memory bytes into the store under `digest`; same no-op
    /// semantics as `store_file`.
    async fn store_bytes(&self, digest: &ContentDigest, bytes: &[u8]) -> Result<PathBuf>;

    async fn contains(&self, digest: &ContentDigest) -> bool;

    async fn remove(&self, digest: &ContentDigest) -> Result<(), PayloadStoreError>;

    /// Wipe the store back to the fresh-install state.
    async fn clear(&self) -> Result<(), PayloadStoreError>;
}
