//! # ck-core
//!
//! Core domain models and business logic for clipkeep.
//!
//! This crate contains pure business logic without any infrastructure dependencies.

// Public module exports
pub mod config;
pub mod history;
pub mod ids;
pub mod ports;

// Re-export commonly used types at the crate root
pub use config::HistoryConfig;
pub use history::{
    AppendOutcome, ChunkStoreError, ClipboardEntry, ContentDigest, FilePayload, HistoryDocument,
    HistoryEvent, NewEntry, PayloadSource, RejectReason,
};
pub use ids::EntryId;
