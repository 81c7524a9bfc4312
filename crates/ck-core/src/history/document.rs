use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::history::{ClipboardEntry, ContentDigest};
use crate::ids::EntryId;

/// Schema version of the export document.
pub const DOCUMENT_VERSION: u32 = 1;

/// A single externally consumable snapshot of the full history, used for
/// export and bulk import. Imported entries are merged through the normal
/// append path so the size gate and retention still apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryDocument {
    pub version: u32,
    pub exported_at_ms: i64,
    pub entries: Vec<DocumentEntry>,
}

/// One entry of an export document. Everything except `text` is
/// optional so externally produced documents stay easy to hand-write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntryId>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at_ms: Option<i64>,
    /// Source path of the payload bytes; re-hashed and re-stored on
    /// import, so the digest below is informative, never trusted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_digest: Option<ContentDigest>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, String>,
}

impl From<&ClipboardEntry> for DocumentEntry {
    fn from(entry: &ClipboardEntry) -> Self {
        Self {
            id: Some(entry.id.clone()),
            text: entry.text.clone(),
            rich_text: entry.rich_text.clone(),
            captured_at_ms: Some(entry.captured_at_ms),
            payload_path: entry.payload.as_ref().map(|p| p.path.clone()),
            payload_size_bytes: entry.payload.as_ref().map(|p| p.size_bytes),
            payload_digest: entry.payload.as_ref().and_then(|p| p.digest),
            aux: entry.aux.clone(),
        }
    }
}
