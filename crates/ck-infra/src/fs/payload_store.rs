//! Content-addressable payload store keyed by digest.
//! 以内容摘要为键的载荷存储。
//!
//! Each captured file/image payload lives at `<root>/<hex digest>`, so
//! byte-identical payloads occupy one file no matter how many history
//! entries reference them. Writes go through a temp file + rename.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use ck_core::history::{ContentDigest, PayloadStoreError};
use ck_core::ports::PayloadStorePort;

const TMP_SUFFIX: &str = "tmp";

pub struct FsPayloadStore {
    root: PathBuf,
}

impl FsPayloadStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create payload dir failed: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn finish_write(&self, tmp: &Path, dest: &Path) -> Result<()> {
        fs::rename(tmp, dest).await.with_context(|| {
            format!(
                "rename payload into place failed: {} -> {}",
                tmp.display(),
                dest.display()
            )
        })
    }
}

#[async_trait]
impl PayloadStorePort for FsPayloadStore {
    fn path_for(&self, digest: &ContentDigest) -> PathBuf {
        self.root.join(digest.to_hex())
    }

    async fn store_file(&self, digest: &ContentDigest, source: &Path) -> Result<PathBuf> {
        let dest = self.path_for(digest);
        if self.contains(digest).await {
            // identical content already stored; this no-op is the dedup
            return Ok(dest);
        }

        let tmp = dest.with_extension(TMP_SUFFIX);
        fs::copy(source, &tmp).await.with_context(|| {
            format!(
                "copy payload failed: {} -> {}",
                source.display(),
                tmp.display()
            )
        })?;
        self.finish_write(&tmp, &dest).await?;
        Ok(dest)
    }

    async fn store_bytes(&self, digest: &ContentDigest, bytes: &[u8]) -> Result<PathBuf> {
        let dest = self.path_for(digest);
        if self.contains(digest).await {
            return Ok(dest);
        }

        let tmp = dest.with_extension(TMP_SUFFIX);
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("write payload failed: {}", tmp.display()))?;
        self.finish_write(&tmp, &dest).await?;
        Ok(dest)
    }

    async fn contains(&self, digest: &ContentDigest) -> bool {
        fs::try_exists(self.path_for(digest)).await.unwrap_or(false)
    }

    async fn remove(&self, digest: &ContentDigest) -> Result<(), PayloadStoreError> {
        match fs::remove_file(self.path_for(digest)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(PayloadStoreError::NotFound {
                    digest: digest.to_hex(),
                })
            }
            Err(err) => Err(PayloadStoreError::Io(err)),
        }
    }

    async fn clear(&self) -> Result<(), PayloadStoreError> {
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(PayloadStoreError::Io)?;
        while let Some(dir_entry) = dir.next_entry().await.map_err(PayloadStoreError::Io)? {
            let path = dir_entry.path();
            if let Err(err) = fs::remove_file(&path).await {
                // keep clearing the rest; one stuck file should not wedge a reset
                warn!(path = %path.display(), error = %err, "remove payload during clear failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FsPayloadStore;
    use ck_core::history::ContentDigest;
    use ck_core::ports::PayloadStorePort;
    use std::str::FromStr;

    fn digest_of(byte: u8) -> ContentDigest {
        ContentDigest::from_str(&format!("{:02x}", byte).repeat(32)).expect("build digest")
    }

    #[tokio::test]
    async fn stores_bytes_once_per_digest() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FsPayloadStore::open(dir.path()).await.expect("open store");
        let digest = digest_of(0xab);

        let first = store.store_bytes(&digest, b"payload").await.expect("store");
        assert!(store.contains(&digest).await);

        // second store with the same digest is a no-op on the same path
        let second = store
            .store_bytes(&digest, b"payload")
            .await
            .expect("store again");
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first).expect("read payload"), b"payload");
    }

    #[tokio::test]
    async fn store_file_copies_the_source() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FsPayloadStore::open(dir.path().join("cas"))
            .await
            .expect("open store");

        let source = dir.path().join("incoming.bin");
        std::fs::write(&source, b"copied bytes").expect("write source");

        let digest = digest_of(0x01);
        let stored = store.store_file(&digest, &source).await.expect("store file");
        assert_eq!(stored, store.path_for(&digest));
        assert_eq!(std::fs::read(&stored).expect("read stored"), b"copied bytes");
        // source stays where the capture layer put it
        assert!(source.exists());
    }

    #[tokio::test]
    async fn remove_missing_payload_is_not_found() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FsPayloadStore::open(dir.path()).await.expect("open store");

        let result = store.remove(&digest_of(0xee)).await;
        assert!(matches!(
            result,
            Err(ck_core::history::PayloadStoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FsPayloadStore::open(dir.path()).await.expect("open store");
        store
            .store_bytes(&digest_of(0x02), b"a")
            .await
            .expect("store a");
        store
            .store_bytes(&digest_of(0x03), b"b")
            .await
            .expect("store b");

        store.clear().await.expect("clear store");
        assert!(!store.contains(&digest_of(0x02)).await);
        assert!(!store.contains(&digest_of(0x03)).await);
    }
}
