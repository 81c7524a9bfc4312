//! Chunk-granular persistence for the ordered history log.
//! 历史日志的分块持久化存储。
//!
//! The history is split into fixed-capacity chunks, one JSON file per
//! chunk, so persisting a mutation costs one chunk rather than the whole
//! history. Files are named `chunk-<seq>.json` with a persistent sequence
//! number; the port's logical index is the rank in ascending sequence
//! order, so deleting the oldest chunk renames nothing.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::warn;

use ck_core::history::{ChunkStoreError, ClipboardEntry};
use ck_core::ports::ChunkStorePort;

const CHUNK_PREFIX: &str = "chunk-";
const CHUNK_SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".tmp";

/// Registry of on-disk chunks. Guarded by a short-lived mutex that is
/// never held across an await point; callers serialize mutations through
/// the manager's single-writer lock.
struct ChunkRegistry {
    seqs: Vec<u64>,
    next_seq: u64,
}

pub struct FsChunkStore {
    root: PathBuf,
    capacity: usize,
    registry: Mutex<ChunkRegistry>,
}

impl FsChunkStore {
    /// Open (or initialize) a chunk store rooted at `root`, scanning the
    /// directory for existing chunk files. Stale temp files left behind
    /// by an interrupted write are removed; unrecognized files are left
    /// alone and logged.
    pub async fn open(root: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        anyhow::ensure!(capacity >= 1, "chunk capacity must be at least 1");
        let root = root.into();

        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create chunk dir failed: {}", root.display()))?;

        let mut seqs = Vec::new();
        let mut dir = fs::read_dir(&root)
            .await
            .with_context(|| format!("scan chunk dir failed: {}", root.display()))?;
        while let Some(dir_entry) = dir
            .next_entry()
            .await
            .with_context(|| format!("scan chunk dir failed: {}", root.display()))?
        {
            let name = dir_entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(path = %dir_entry.path().display(), "ignoring non-utf8 file in chunk dir");
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                // leftover from a write interrupted before the rename
                warn!(file = name, "removing stale temp chunk file");
                let _ = fs::remove_file(dir_entry.path()).await;
                continue;
            }
            match parse_chunk_seq(name) {
                Some(seq) => seqs.push(seq),
                None => warn!(file = name, "ignoring unrecognized file in chunk dir"),
            }
        }
        seqs.sort_unstable();
        let next_seq = seqs.last().map_or(0, |last| last + 1);

        Ok(Self {
            root,
            capacity,
            registry: Mutex::new(ChunkRegistry { seqs, next_seq }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, seq: u64) -> PathBuf {
        self.root.join(format!("{CHUNK_PREFIX}{seq:08}{CHUNK_SUFFIX}"))
    }

    fn seq_at(&self, index: usize) -> Option<u64> {
        self.registry
            .lock()
            .expect("chunk registry poisoned")
            .seqs
            .get(index)
            .copied()
    }

    /// Resolve the sequence number for a save, reserving a fresh one
    /// when `index` points one past the end (chunk creation).
    fn reserve_seq(&self, index: usize) -> Result<(u64, bool), ChunkStoreError> {
        let mut registry = self.registry.lock().expect("chunk registry poisoned");
        if index < registry.seqs.len() {
            return Ok((registry.seqs[index], false));
        }
        if index == registry.seqs.len() {
            let seq = registry.next_seq;
            registry.next_seq += 1;
            registry.seqs.push(seq);
            return Ok((seq, true));
        }
        Err(ChunkStoreError::NotFound { index })
    }

    fn unreserve_seq(&self, seq: u64) {
        let mut registry = self.registry.lock().expect("chunk registry poisoned");
        if registry.seqs.last() == Some(&seq) {
            registry.seqs.pop();
        }
    }
}

fn parse_chunk_seq(name: &str) -> Option<u64> {
    name.strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(CHUNK_SUFFIX)?
        .parse()
        .ok()
}

#[async_trait]
impl ChunkStorePort for FsChunkStore {
    fn chunk_count(&self) -> usize {
        self.registry
            .lock()
            .expect("chunk registry poisoned")
            .seqs
            .len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn load_chunk(&self, index: usize) -> Result<Vec<ClipboardEntry>, ChunkStoreError> {
        let seq = self
            .seq_at(index)
            .ok_or(ChunkStoreError::NotFound { index })?;
        let path = self.chunk_path(seq);

        let bytes = fs::read(&path).await.map_err(ChunkStoreError::Io)?;
        serde_json::from_slice(&bytes).map_err(|err| ChunkStoreError::Corrupt {
            index,
            message: err.to_string(),
        })
    }

    async fn save_chunk(
        &self,
        index: usize,
        entries: &[ClipboardEntry],
    ) -> Result<(), ChunkStoreError> {
        debug_assert!(
            entries.len() <= self.capacity,
            "chunk {index} over capacity: {} > {}",
            entries.len(),
            self.capacity
        );

        let (seq, created) = self.reserve_seq(index)?;
        let path = self.chunk_path(seq);
        let tmp = self.root.join(format!("{CHUNK_PREFIX}{seq:08}{CHUNK_SUFFIX}{TMP_SUFFIX}"));

        let result = async {
            let bytes = serde_json::to_vec(entries).map_err(std::io::Error::other)?;
            fs::write(&tmp, &bytes).await?;
            fs::rename(&tmp, &path).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(err) = result {
            if created {
                self.unreserve_seq(seq);
            }
            let _ = fs::remove_file(&tmp).await;
            return Err(ChunkStoreError::Io(err));
        }
        Ok(())
    }

    async fn delete_chunk(&self, index: usize) -> Result<(), ChunkStoreError> {
        let seq = self
            .seq_at(index)
            .ok_or(ChunkStoreError::NotFound { index })?;
        let path = self.chunk_path(seq);

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(chunk = index, path = %path.display(), "chunk file already gone");
            }
            Err(err) => return Err(ChunkStoreError::Io(err)),
        }

        let mut registry = self.registry.lock().expect("chunk registry poisoned");
        if let Some(pos) = registry.seqs.iter().position(|s| *s == seq) {
            registry.seqs.remove(pos);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_chunk_seq, FsChunkStore};
    use ck_core::history::{ChunkStoreError, ClipboardEntry};
    use ck_core::ids::EntryId;
    use ck_core::ports::ChunkStorePort;
    use std::collections::BTreeMap;

    fn entry(id: &str, text: &str) -> ClipboardEntry {
        ClipboardEntry::new(
            EntryId::from(id),
            text.to_string(),
            None,
            0,
            None,
            BTreeMap::new(),
        )
    }

    #[test]
    fn parses_chunk_file_names() {
        assert_eq!(parse_chunk_seq("chunk-00000000.json"), Some(0));
        assert_eq!(parse_chunk_seq("chunk-00000042.json"), Some(42));
        assert_eq!(parse_chunk_seq("chunk-42.json"), Some(42));
        assert_eq!(parse_chunk_seq("chunk-.json"), None);
        assert_eq!(parse_chunk_seq("other.json"), None);
        assert_eq!(parse_chunk_seq("chunk-00000001.json.tmp"), None);
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FsChunkStore::open(dir.path(), 4).await.expect("open store");
        assert_eq!(store.chunk_count(), 0);

        let entries = vec![entry("a", "first"), entry("b", "second")];
        store.save_chunk(0, &entries).await.expect("save chunk");
        assert_eq!(store.chunk_count(), 1);

        let loaded = store.load_chunk(0).await.expect("load chunk");
        assert_eq!(loaded, entries);
    }

    #[tokio::test]
    async fn save_past_end_is_not_found() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FsChunkStore::open(dir.path(), 4).await.expect("open store");

        let result = store.save_chunk(1, &[entry("a", "x")]).await;
        assert!(matches!(result, Err(ChunkStoreError::NotFound { index: 1 })));
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn reopen_sees_persisted_chunks() {
        let dir = tempfile::tempdir().expect("create temp dir");
        {
            let store = FsChunkStore::open(dir.path(), 4).await.expect("open store");
            store.save_chunk(0, &[entry("a", "x")]).await.expect("save 0");
            store.save_chunk(1, &[entry("b", "y")]).await.expect("save 1");
        }

        let store = FsChunkStore::open(dir.path(), 4).await.expect("reopen store");
        assert_eq!(store.chunk_count(), 2);
        let first = store.load_chunk(0).await.expect("load chunk 0");
        assert_eq!(first[0].text, "x");
    }

    #[tokio::test]
    async fn deleting_oldest_shifts_logical_indexes() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FsChunkStore::open(dir.path(), 4).await.expect("open store");
        store.save_chunk(0, &[entry("a", "oldest")]).await.expect("save 0");
        store.save_chunk(1, &[entry("b", "middle")]).await.expect("save 1");
        store.save_chunk(2, &[entry("c", "newest")]).await.expect("save 2");

        store.delete_chunk(0).await.expect("delete oldest");
        assert_eq!(store.chunk_count(), 2);

        let now_first = store.load_chunk(0).await.expect("load shifted chunk");
        assert_eq!(now_first[0].text, "middle");

        // the rank shifted, the files did not
        let reopened = FsChunkStore::open(dir.path(), 4).await.expect("reopen store");
        assert_eq!(reopened.chunk_count(), 2);
    }

    #[tokio::test]
    async fn corrupt_chunk_is_reported_not_dropped() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FsChunkStore::open(dir.path(), 4).await.expect("open store");
        store.save_chunk(0, &[entry("a", "ok")]).await.expect("save chunk");

        std::fs::write(dir.path().join("chunk-00000000.json"), b"{ not json")
            .expect("corrupt chunk file");

        let result = store.load_chunk(0).await;
        assert!(matches!(result, Err(ChunkStoreError::Corrupt { index: 0, .. })));
        // the corrupt file stays on disk for recovery
        assert!(dir.path().join("chunk-00000000.json").exists());
    }

    #[tokio::test]
    async fn no_temp_files_survive_a_save() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = FsChunkStore::open(dir.path(), 4).await.expect("open store");
        store.save_chunk(0, &[entry("a", "x")]).await.expect("save chunk");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "tmp file should be removed after rename");
    }

    #[tokio::test]
    async fn stale_temp_files_are_cleaned_on_open() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("chunk-00000005.json.tmp"), b"partial")
            .expect("plant stale tmp");

        let store = FsChunkStore::open(dir.path(), 4).await.expect("open store");
        assert_eq!(store.chunk_count(), 0);
        assert!(!dir.path().join("chunk-00000005.json.tmp").exists());
    }
}
