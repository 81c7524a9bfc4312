pub mod digest;
pub mod document;
pub mod entry;
pub mod errors;
pub mod event;
pub mod retention;

pub use digest::{ContentDigest, DigestParseError, DIGEST_LEN};
pub use document::{DocumentEntry, HistoryDocument, DOCUMENT_VERSION};
pub use entry::{ClipboardEntry, FilePayload, NewEntry, PayloadSource};
pub use errors::{AppendOutcome, ChunkStoreError, PayloadStoreError, RejectReason};
pub use event::HistoryEvent;
