//! History orchestration: append, retention, backfill, import/export.
//! 历史编排：追加、保留策略、摘要回填、导入导出。
//!
//! `HistoryManager` is the single coordination point every collaborator
//! talks to. One async mutex guards the in-memory view, giving the whole
//! store a single-writer discipline: chunk boundaries shift as a side
//! effect of append/evict, so every mutation is computed against a
//! consistent chunk count. Payload hashing and storage happen before the
//! lock is taken, so digesting a large file never blocks capture.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use ck_core::config::HistoryConfig;
use ck_core::history::{
    retention, AppendOutcome, ClipboardEntry, ContentDigest, DocumentEntry, FilePayload,
    HistoryDocument, HistoryEvent, NewEntry, PayloadSource, RejectReason, DOCUMENT_VERSION,
};
use ck_core::ids::EntryId;
use ck_core::ports::{ChunkStorePort, ClockPort, ContentHashPort, PayloadStorePort};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What the startup scan found.
#[derive(Debug, Clone, Default)]
pub struct OpenReport {
    pub chunks: usize,
    pub entries: usize,
    pub corrupt_chunks: Vec<CorruptChunk>,
}

/// One chunk excluded from the aggregated view. The backing file is left
/// on disk untouched so the bytes stay available for recovery.
#[derive(Debug, Clone)]
pub struct CorruptChunk {
    pub index: usize,
    pub message: String,
}

/// Outcome of one backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub chunks_visited: usize,
    pub chunks_rewritten: usize,
    pub entries_updated: usize,
    pub missing_files: usize,
    pub hash_failures: usize,
    pub corrupt_chunks: usize,
    pub ran_out_of_budget: bool,
}

/// Outcome of a bulk import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub appended: usize,
    pub rejected: usize,
    pub payloads_missing: usize,
}

/// In-memory mirror of one on-disk chunk. `slot_id` is a process-local
/// identity that survives logical index shifts, so the backfill snapshot
/// can find "the same chunk" after evictions.
struct ChunkSlot {
    slot_id: u64,
    entries: Vec<ClipboardEntry>,
    corrupt: bool,
}

struct HistoryState {
    slots: Vec<ChunkSlot>,
    next_slot_id: u64,
    /// digest -> live reference count; a payload file is released only
    /// when its count drops to zero
    digest_refs: HashMap<ContentDigest, usize>,
    /// entry id -> slot id, kept incrementally instead of scanning
    locations: HashMap<EntryId, u64>,
}

impl HistoryState {
    fn loaded_entries(&self) -> usize {
        self.slots.iter().map(|slot| slot.entries.len()).sum()
    }

    /// Returns true when the last live reference was released.
    fn release_digest(&mut self, digest: ContentDigest) -> bool {
        match self.digest_refs.get_mut(&digest) {
            Some(refs) if *refs > 1 => {
                *refs -= 1;
                false
            }
            Some(_) => {
                self.digest_refs.remove(&digest);
                true
            }
            None => false,
        }
    }
}

pub struct HistoryManager {
    config: HistoryConfig,
    chunks: Arc<dyn ChunkStorePort>,
    payloads: Arc<dyn PayloadStorePort>,
    hasher: Arc<dyn ContentHashPort>,
    clock: Arc<dyn ClockPort>,
    state: Mutex<HistoryState>,
    events: broadcast::Sender<HistoryEvent>,
}

impl HistoryManager {
    /// Scan every chunk once and build the in-memory view plus the
    /// digest/id indexes. A chunk that cannot be read or parsed is
    /// logged, reported, excluded from the view, and never rewritten;
    /// the rest of the history stays available.
    pub async fn open(
        config: HistoryConfig,
        chunks: Arc<dyn ChunkStorePort>,
        payloads: Arc<dyn PayloadStorePort>,
        hasher: Arc<dyn ContentHashPort>,
        clock: Arc<dyn ClockPort>,
    ) -> Result<(Self, OpenReport)> {
        anyhow::ensure!(
            chunks.capacity() == config.chunk_capacity,
            "chunk store capacity {} does not match configured capacity {}",
            chunks.capacity(),
            config.chunk_capacity
        );

        let mut state = HistoryState {
            slots: Vec::new(),
            next_slot_id: 0,
            digest_refs: HashMap::new(),
            locations: HashMap::new(),
        };
        let mut report = OpenReport {
            chunks: chunks.chunk_count(),
            ..OpenReport::default()
        };
        let mut seen_ids: HashSet<EntryId> = HashSet::new();

        for index in 0..report.chunks {
            let slot_id = state.next_slot_id;
            state.next_slot_id += 1;

            match chunks.load_chunk(index).await {
                Ok(entries) => {
                    for entry in &entries {
                        if !seen_ids.insert(entry.id.clone()) {
                            warn!(chunk = index, id = %entry.id, "duplicate entry id in history");
                        }
                        state.locations.insert(entry.id.clone(), slot_id);
                        if let Some(digest) = entry.digest() {
                            *state.digest_refs.entry(digest).or_insert(0) += 1;
                        }
                    }
                    report.entries += entries.len();
                    state.slots.push(ChunkSlot {
                        slot_id,
                        entries,
                        corrupt: false,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(chunk = index, error = %message, "excluding unreadable chunk from view");
                    report.corrupt_chunks.push(CorruptChunk { index, message });
                    state.slots.push(ChunkSlot {
                        slot_id,
                        entries: Vec::new(),
                        corrupt: true,
                    });
                }
            }
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let manager = Self {
            config,
            chunks,
            payloads,
            hasher,
            clock,
            state: Mutex::new(state),
            events,
        };
        Ok((manager, report))
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.chunk_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    /// Admit a freshly captured candidate: size gate first, then digest
    /// and content-addressed storage, then the chunk append, then count
    /// retention. Nothing is committed until the chunk save succeeds.
    pub async fn append(&self, candidate: NewEntry) -> Result<AppendOutcome> {
        self.append_internal(candidate, None, None).await
    }

    async fn append_internal(
        &self,
        candidate: NewEntry,
        id_hint: Option<EntryId>,
        captured_at_hint: Option<i64>,
    ) -> Result<AppendOutcome> {
        let payload = match candidate.payload {
            None => None,
            Some(PayloadSource::Bytes(bytes)) => {
                let size_bytes = bytes.len() as u64;
                if retention::exceeds_size_limit(size_bytes, self.config.max_payload_bytes) {
                    return Ok(AppendOutcome::Rejected(RejectReason::PayloadTooLarge {
                        size_bytes,
                        max_bytes: self.config.max_payload_bytes,
                    }));
                }
                let digest = self.hasher.hash_bytes(&bytes);
                let path = self
                    .payloads
                    .store_bytes(&digest, &bytes)
                    .await
                    .context("store payload bytes failed")?;
                Some(FilePayload {
                    path,
                    size_bytes,
                    digest: Some(digest),
                })
            }
            Some(PayloadSource::File(source)) => {
                let size_bytes = fs::metadata(&source)
                    .await
                    .with_context(|| format!("stat payload source failed: {}", source.display()))?
                    .len();
                if retention::exceeds_size_limit(size_bytes, self.config.max_payload_bytes) {
                    return Ok(AppendOutcome::Rejected(RejectReason::PayloadTooLarge {
                        size_bytes,
                        max_bytes: self.config.max_payload_bytes,
                    }));
                }
                let digest = self.hasher.hash_file(&source).await?;
                let path = self
                    .payloads
                    .store_file(&digest, &source)
                    .await
                    .context("store payload file failed")?;
                Some(FilePayload {
                    path,
                    size_bytes,
                    digest: Some(digest),
                })
            }
        };

        let mut entry = ClipboardEntry::new(
            id_hint.unwrap_or_else(EntryId::new),
            candidate.text,
            candidate.rich_text,
            captured_at_hint.unwrap_or_else(|| self.clock.now_ms()),
            payload,
            candidate.aux,
        );

        let mut state = self.state.lock().await;
        if state.locations.contains_key(&entry.id) {
            // an imported id collides with a live entry; keep both
            entry.id = EntryId::new();
        }
        let id = entry.id.clone();
        let evicted = self.commit_append(&mut state, entry).await?;
        drop(state);

        let _ = self.events.send(HistoryEvent::Appended { id: id.clone() });
        if evicted > 0 {
            let _ = self.events.send(HistoryEvent::Evicted { count: evicted });
        }
        Ok(AppendOutcome::Appended(id))
    }

    async fn commit_append(
        &self,
        state: &mut HistoryState,
        entry: ClipboardEntry,
    ) -> Result<usize> {
        let capacity = self.chunks.capacity();
        let opened_new = match state.slots.last() {
            None => true,
            // a corrupt newest chunk is never rewritten; open a fresh one
            Some(slot) => slot.corrupt || slot.entries.len() >= capacity,
        };
        if opened_new {
            let slot_id = state.next_slot_id;
            state.next_slot_id += 1;
            state.slots.push(ChunkSlot {
                slot_id,
                entries: Vec::new(),
                corrupt: false,
            });
        }

        let index = state.slots.len() - 1;
        let slot_id = state.slots[index].slot_id;
        let entry_id = entry.id.clone();
        let digest = entry.digest();

        state.slots[index].entries.push(entry);
        if let Err(err) = self.chunks.save_chunk(index, &state.slots[index].entries).await {
            // nothing is committed until the save lands
            state.slots[index].entries.pop();
            if opened_new {
                state.slots.pop();
            }
            if let Some(digest) = digest {
                if !state.digest_refs.contains_key(&digest) {
                    if let Err(remove_err) = self.payloads.remove(&digest).await {
                        warn!(digest = %digest, error = %remove_err, "drop orphaned payload failed");
                    }
                }
            }
            return Err(err).context("persist appended chunk failed");
        }

        state.locations.insert(entry_id, slot_id);
        if let Some(digest) = digest {
            *state.digest_refs.entry(digest).or_insert(0) += 1;
        }

        self.apply_retention(state).await
    }

    /// Drop the oldest entries until the count limit holds again. Disk is
    /// updated before memory, so a failed rewrite leaves the view intact.
    async fn apply_retention(&self, state: &mut HistoryState) -> Result<usize> {
        let mut remaining =
            retention::evict_count(state.loaded_entries(), self.config.max_entries);
        if remaining == 0 {
            return Ok(0);
        }

        let mut evicted = 0usize;
        let mut released: Vec<ContentDigest> = Vec::new();

        while remaining > 0 {
            let Some(pos) = state
                .slots
                .iter()
                .position(|slot| !slot.corrupt && !slot.entries.is_empty())
            else {
                break;
            };

            let take = remaining.min(state.slots[pos].entries.len());
            let kept: Vec<ClipboardEntry> = state.slots[pos].entries[take..].to_vec();

            if kept.is_empty() {
                self.chunks
                    .delete_chunk(pos)
                    .await
                    .context("delete emptied chunk during eviction failed")?;
            } else {
                self.chunks
                    .save_chunk(pos, &kept)
                    .await
                    .context("rewrite chunk during eviction failed")?;
            }

            let dropped: Vec<ClipboardEntry> =
                state.slots[pos].entries.drain(..take).collect();
            for entry in &dropped {
                state.locations.remove(&entry.id);
                if let Some(digest) = entry.digest() {
                    if state.release_digest(digest) {
                        released.push(digest);
                    }
                }
            }
            if kept.is_empty() {
                state.slots.remove(pos);
            }

            evicted += take;
            remaining -= take;
        }

        for digest in released {
            if let Err(err) = self.payloads.remove(&digest).await {
                warn!(digest = %digest, error = %err, "release evicted payload failed");
            }
        }
        Ok(evicted)
    }

    /// The canonical ordering: chunk 0 oldest .. chunk N-1 newest, append
    /// order within each chunk.
    pub async fn load_all(&self) -> Vec<ClipboardEntry> {
        let state = self.state.lock().await;
        state
            .slots
            .iter()
            .flat_map(|slot| slot.entries.iter().cloned())
            .collect()
    }

    /// Delete a single entry, rewriting only its chunk. The backing
    /// payload is released only when no surviving entry shares its digest.
    pub async fn remove(&self, id: &EntryId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(slot_id) = state.locations.get(id).copied() else {
            return Ok(false);
        };
        let Some(pos) = state.slots.iter().position(|slot| slot.slot_id == slot_id) else {
            return Ok(false);
        };
        let Some(entry_pos) = state.slots[pos].entries.iter().position(|e| &e.id == id) else {
            return Ok(false);
        };

        let mut kept = state.slots[pos].entries.clone();
        let removed = kept.remove(entry_pos);

        if kept.is_empty() {
            self.chunks
                .delete_chunk(pos)
                .await
                .context("delete emptied chunk failed")?;
        } else {
            self.chunks
                .save_chunk(pos, &kept)
                .await
                .context("rewrite chunk after removal failed")?;
        }

        if kept.is_empty() {
            state.slots.remove(pos);
        } else {
            state.slots[pos].entries = kept;
        }
        state.locations.remove(id);

        let mut released = None;
        if let Some(digest) = removed.digest() {
            if state.release_digest(digest) {
                released = Some(digest);
            }
        }
        drop(state);

        if let Some(digest) = released {
            if let Err(err) = self.payloads.remove(&digest).await {
                warn!(digest = %digest, error = %err, "release removed payload failed");
            }
        }
        let _ = self.events.send(HistoryEvent::Removed { id: id.clone() });
        Ok(true)
    }

    /// Back to the fresh-install state: every chunk (corrupt ones
    /// included) and every payload is deleted.
    pub async fn clear_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        while self.chunks.chunk_count() > 0 {
            self.chunks
                .delete_chunk(0)
                .await
                .context("delete chunk during clear failed")?;
        }
        self.payloads
            .clear()
            .await
            .context("clear payload store failed")?;
        state.slots.clear();
        state.digest_refs.clear();
        state.locations.clear();
        drop(state);

        let _ = self.events.send(HistoryEvent::Cleared);
        info!("history cleared");
        Ok(())
    }

    /// One idempotent migration pass computing digests for entries
    /// persisted before digesting existed. Operates on a point-in-time
    /// snapshot of the chunks present at the start; a chunk appended
    /// afterwards is simply covered by the next run. Hashing happens
    /// outside the state lock, and each changed chunk is rewritten once.
    pub async fn backfill_missing_digests(
        &self,
        budget: Option<Duration>,
    ) -> Result<BackfillReport> {
        let started = Instant::now();
        let mut report = BackfillReport::default();

        let snapshot: Vec<u64> = {
            let state = self.state.lock().await;
            state.slots.iter().map(|slot| slot.slot_id).collect()
        };

        for slot_id in snapshot {
            if let Some(limit) = budget {
                if started.elapsed() >= limit {
                    report.ran_out_of_budget = true;
                    break;
                }
            }

            enum Scan {
                Gone,
                Corrupt,
                Pending(Vec<(EntryId, PathBuf)>),
            }
            let scan = {
                let state = self.state.lock().await;
                match state.slots.iter().find(|slot| slot.slot_id == slot_id) {
                    None => Scan::Gone,
                    Some(slot) if slot.corrupt => Scan::Corrupt,
                    Some(slot) => Scan::Pending(
                        slot.entries
                            .iter()
                            .filter_map(|entry| match &entry.payload {
                                Some(payload) if payload.digest.is_none() => {
                                    Some((entry.id.clone(), payload.path.clone()))
                                }
                                _ => None,
                            })
                            .collect(),
                    ),
                }
            };
            let pending = match scan {
                Scan::Gone => continue, // evicted since the snapshot
                Scan::Corrupt => {
                    report.corrupt_chunks += 1;
                    continue;
                }
                Scan::Pending(pending) => pending,
            };
            report.chunks_visited += 1;
            if pending.is_empty() {
                continue;
            }

            let mut computed: Vec<(EntryId, ContentDigest)> = Vec::with_capacity(pending.len());
            for (id, path) in pending {
                match fs::try_exists(&path).await {
                    Ok(true) => {}
                    Ok(false) => {
                        // the file is gone; nothing to hash, not an error
                        report.missing_files += 1;
                        continue;
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "probe payload file failed");
                        report.missing_files += 1;
                        continue;
                    }
                }
                match self.hasher.hash_file(&path).await {
                    Ok(digest) => computed.push((id, digest)),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "digest payload file failed");
                        report.hash_failures += 1;
                    }
                }
            }
            if computed.is_empty() {
                continue;
            }

            let mut state = self.state.lock().await;
            let Some(pos) = state.slots.iter().position(|slot| slot.slot_id == slot_id) else {
                continue;
            };

            let mut entries = state.slots[pos].entries.clone();
            let mut applied: Vec<ContentDigest> = Vec::new();
            for (id, digest) in &computed {
                let Some(entry) = entries.iter_mut().find(|e| &e.id == id) else {
                    continue;
                };
                if let Some(payload) = entry.payload.as_mut() {
                    if payload.digest.is_none() {
                        payload.digest = Some(*digest);
                        applied.push(*digest);
                    }
                }
            }
            if applied.is_empty() {
                continue;
            }

            match self.chunks.save_chunk(pos, &entries).await {
                Ok(()) => {
                    state.slots[pos].entries = entries;
                    for digest in &applied {
                        *state.digest_refs.entry(*digest).or_insert(0) += 1;
                    }
                    report.chunks_rewritten += 1;
                    report.entries_updated += applied.len();
                }
                Err(err) => {
                    // stay available: skip this chunk, keep migrating the rest
                    error!(chunk = pos, error = %err, "backfill rewrite failed");
                }
            }
        }

        if report.entries_updated > 0 {
            let _ = self.events.send(HistoryEvent::BackfillCompleted {
                entries_updated: report.entries_updated,
            });
        }
        info!(
            chunks_visited = report.chunks_visited,
            chunks_rewritten = report.chunks_rewritten,
            entries_updated = report.entries_updated,
            missing_files = report.missing_files,
            "digest backfill pass finished"
        );
        Ok(report)
    }

    /// Merge externally supplied entries through the normal append path,
    /// so the size gate and retention still apply. Document ids are kept
    /// unless they collide with a live entry.
    pub async fn import(&self, document: HistoryDocument) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for doc_entry in document.entries {
            let payload = match &doc_entry.payload_path {
                Some(path) => match fs::try_exists(path).await {
                    Ok(true) => Some(PayloadSource::File(path.clone())),
                    _ => {
                        warn!(path = %path.display(), "imported payload file missing; importing text only");
                        report.payloads_missing += 1;
                        None
                    }
                },
                None => None,
            };

            let candidate = NewEntry {
                text: doc_entry.text,
                rich_text: doc_entry.rich_text,
                payload,
                aux: doc_entry.aux,
            };
            match self
                .append_internal(candidate, doc_entry.id, doc_entry.captured_at_ms)
                .await?
            {
                AppendOutcome::Appended(_) => report.appended += 1,
                AppendOutcome::Rejected(reason) => {
                    warn!(%reason, "imported entry rejected");
                    report.rejected += 1;
                }
            }
        }

        let _ = self.events.send(HistoryEvent::Imported {
            appended: report.appended,
            rejected: report.rejected,
        });
        Ok(report)
    }

    /// Snapshot the full history into a single externally consumable
    /// document.
    pub async fn export(&self) -> HistoryDocument {
        let entries = self.load_all().await;
        HistoryDocument {
            version: DOCUMENT_VERSION,
            exported_at_ms: self.clock.now_ms(),
            entries: entries.iter().map(DocumentEntry::from).collect(),
        }
    }

    pub async fn export_to_file(&self, path: &Path) -> Result<()> {
        let document = self.export().await;
        let bytes =
            serde_json::to_vec_pretty(&document).context("serialize export document failed")?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("write export document failed: {}", tmp.display()))?;
        fs::rename(&tmp, path).await.with_context(|| {
            format!(
                "rename export document into place failed: {} -> {}",
                tmp.display(),
                path.display()
            )
        })
    }

    pub async fn import_from_file(&self, path: &Path) -> Result<ImportReport> {
        let bytes = fs::read(path)
            .await
            .with_context(|| format!("read import document failed: {}", path.display()))?;
        let document: HistoryDocument =
            serde_json::from_slice(&bytes).context("parse import document failed")?;
        self.import(document).await
    }
}
