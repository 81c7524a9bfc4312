use async_trait::async_trait;

use crate::history::{ChunkStoreError, ClipboardEntry};

/// Durable, chunk-granular persistence of the ordered entry sequence.
///
/// The history is partitioned into fixed-capacity chunks addressed by a
/// zero-based logical index (0 oldest). Persisting a change costs one
/// chunk, not the whole history. Deleting a chunk shifts the logical
/// indexes of every later chunk down by one.
#[async_trait]
pub trait ChunkStorePort: Send + Sync {
    /// Number of chunks currently on disk (0 on a fresh store).
    fn chunk_count(&self) -> usize;

    /// Store-wide chunk capacity, fixed at construction.
    fn capacity(&self) -> usize;

    /// Deserialize chunk `index`. `Corrupt` means the stored bytes
    /// cannot be parsed; callers must surface that, never silently
    /// drop the chunk.
    async fn load_chunk(&self, index: usize) -> Result<Vec<ClipboardEntry>, ChunkStoreError>;

    /// Serialize `entries` and durably replace chunk `index`.
    /// `index == chunk_count()` creates a new chunk. Writers use a
    /// temp-file + atomic-rename discipline, so a crash mid-write never
    /// leaves a half-written chunk visible.
    async fn save_chunk(
        &self,
        index: usize,
        entries: &[ClipboardEntry],
    ) -> Result<(), ChunkStoreError>;

    /// Remove chunk `index`'s backing storage entirely.
    async fn delete_chunk(&self, index: usize) -> Result<(), ChunkStoreError>;
}
