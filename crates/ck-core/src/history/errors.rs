use std::fmt;

use thiserror::Error;

use crate::ids::EntryId;

/// Failures of the chunk-granular log.
///
/// `Corrupt` is isolated to a single chunk and must never abort
/// processing of the others; callers surface it instead of silently
/// dropping the chunk.
#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error("chunk {index} not found")]
    NotFound { index: usize },

    #[error("chunk {index} is corrupt: {message}")]
    Corrupt { index: usize, message: String },

    #[error("chunk store i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the content-addressable payload store.
#[derive(Debug, Error)]
pub enum PayloadStoreError {
    #[error("payload {digest} not found")]
    NotFound { digest: String },

    #[error("payload store i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a candidate entry was refused admission.
///
/// Rejection is a policy decision, not an error; the capture layer
/// decides whether to prompt the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    PayloadTooLarge { size_bytes: u64, max_bytes: u64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::PayloadTooLarge {
                size_bytes,
                max_bytes,
            } => write!(
                f,
                "payload of {size_bytes} bytes exceeds the {max_bytes} byte limit"
            ),
        }
    }
}

/// Result of an `append`: either the id of the admitted entry or the
/// reason the candidate was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(EntryId),
    Rejected(RejectReason),
}

impl AppendOutcome {
    pub fn entry_id(&self) -> Option<&EntryId> {
        match self {
            AppendOutcome::Appended(id) => Some(id),
            AppendOutcome::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, AppendOutcome::Rejected(_))
    }
}
