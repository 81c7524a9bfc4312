use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::history::ContentDigest;
use crate::ids::EntryId;

/// Reference to an on-disk payload captured alongside an entry.
///
/// `digest: None` is a valid transient state (not yet computed); the
/// startup backfill pass repairs it. Keeping size and digest inside this
/// struct makes "no payload but a dangling size/digest" unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePayload {
    pub path: PathBuf,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<ContentDigest>,
}

/// The unit of clipboard history.
///
/// History order is insertion order (chunk placement); `captured_at_ms`
/// is stored for display and sorting elsewhere, it is not authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardEntry {
    pub id: EntryId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_text: Option<String>,
    pub captured_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<FilePayload>,
    /// Opaque metadata (origin app path, detected language, ...);
    /// never affects identity or dedup.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, String>,
}

impl ClipboardEntry {
    pub fn new(
        id: EntryId,
        text: String,
        rich_text: Option<String>,
        captured_at_ms: i64,
        payload: Option<FilePayload>,
        aux: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            text,
            rich_text,
            captured_at_ms,
            payload,
            aux,
        }
    }

    pub fn digest(&self) -> Option<ContentDigest> {
        self.payload.as_ref().and_then(|p| p.digest)
    }
}

/// Payload content arriving with a freshly captured entry.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// A copied file already on disk (the monitor hands over its path).
    File(PathBuf),
    /// In-memory bytes, e.g. pasted image data.
    Bytes(Vec<u8>),
}

/// A candidate entry as handed over by the capture layer, before the size
/// gate, digesting, and id/timestamp assignment.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub text: String,
    pub rich_text: Option<String>,
    pub payload: Option<PayloadSource>,
    pub aux: BTreeMap<String, String>,
}

impl NewEntry {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: PayloadSource) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_rich_text(mut self, rich_text: impl Into<String>) -> Self {
        self.rich_text = Some(rich_text.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serde_skips_absent_fields() {
        let entry = ClipboardEntry::new(
            EntryId::from("e-1"),
            "hello".to_string(),
            None,
            42,
            None,
            BTreeMap::new(),
        );

        let json = serde_json::to_string(&entry).expect("serialize entry");
        assert!(!json.contains("rich_text"));
        assert!(!json.contains("payload"));
        assert!(!json.contains("aux"));

        let back: ClipboardEntry = serde_json::from_str(&json).expect("deserialize entry");
        assert_eq!(back, entry);
    }

    #[test]
    fn payload_digest_round_trips() {
        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            .parse()
            .expect("parse digest");
        let entry = ClipboardEntry::new(
            EntryId::from("e-2"),
            String::new(),
            Some("<b>rich</b>".to_string()),
            7,
            Some(FilePayload {
                path: PathBuf::from("/payloads/abc"),
                size_bytes: 128,
                digest: Some(digest),
            }),
            BTreeMap::new(),
        );

        let json = serde_json::to_string(&entry).expect("serialize entry");
        let back: ClipboardEntry = serde_json::from_str(&json).expect("deserialize entry");
        assert_eq!(back.digest(), Some(digest));
        assert_eq!(back, entry);
    }
}
