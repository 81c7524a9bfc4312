//! # ck-infra
//!
//! Filesystem and runtime adapters for clipkeep: the chunked history
//! log, the content-addressable payload store, the SHA-256 engine, and
//! the orchestrating [`HistoryManager`].

pub mod fs;
pub mod hash;
pub mod history;
pub mod time;

pub use fs::{FsChunkStore, FsPayloadStore};
pub use hash::Sha256Engine;
pub use history::{BackfillReport, HistoryManager, ImportReport, OpenReport};
pub use time::SystemClock;
