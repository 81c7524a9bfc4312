use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::history::ContentDigest;

/// Content digesting over bytes and files.
#[async_trait]
pub trait ContentHashPort: Send + Sync {
    /// Digest an in-memory buffer; never fails.
    fn hash_bytes(&self, bytes: &[u8]) -> ContentDigest;

    /// Digest a file in bounded-memory windows. A failed open or a read
    /// failure mid-stream discards the partial state; no partial digest
    /// is ever returned.
    async fn hash_file(&self, path: &Path) -> Result<ContentDigest>;
}
