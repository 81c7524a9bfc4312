//! SHA-256 content digest engine.
//! SHA-256 内容摘要引擎。

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use ck_core::history::ContentDigest;
use ck_core::ports::ContentHashPort;

/// Fixed read window for file digesting; memory stays bounded by this
/// size regardless of how large the payload is.
const READ_WINDOW: usize = 64 * 1024;

pub struct Sha256Engine;

#[async_trait]
impl ContentHashPort for Sha256Engine {
    fn hash_bytes(&self, bytes: &[u8]) -> ContentDigest {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        ContentDigest::from_bytes(hasher.finalize().into())
    }

    async fn hash_file(&self, path: &Path) -> Result<ContentDigest> {
        let mut file = File::open(path)
            .await
            .with_context(|| format!("open for digesting failed: {}", path.display()))?;

        let mut hasher = Sha256::new();
        let mut window = vec![0u8; READ_WINDOW];
        loop {
            let read = file
                .read(&mut window)
                .await
                .with_context(|| format!("read for digesting failed: {}", path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&window[..read]);
        }

        Ok(ContentDigest::from_bytes(hasher.finalize().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::Sha256Engine;
    use ck_core::ports::ContentHashPort;

    // sha256("abc"), the FIPS 180-2 test vector
    const ABC_DIGEST: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn hash_bytes_matches_known_vector() {
        let engine = Sha256Engine;
        assert_eq!(engine.hash_bytes(b"abc").to_hex(), ABC_DIGEST);
    }

    #[test]
    fn hash_bytes_of_empty_input() {
        let engine = Sha256Engine;
        assert_eq!(
            engine.hash_bytes(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn hash_file_agrees_with_hash_bytes() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("payload.bin");
        // larger than one read window so the loop actually iterates
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).expect("write payload");

        let engine = Sha256Engine;
        let from_file = engine.hash_file(&path).await.expect("digest file");
        assert_eq!(from_file, engine.hash_bytes(&content));
    }

    #[tokio::test]
    async fn hash_file_fails_on_missing_path() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let engine = Sha256Engine;
        let result = engine.hash_file(&dir.path().join("gone.bin")).await;
        assert!(result.is_err());
    }
}
