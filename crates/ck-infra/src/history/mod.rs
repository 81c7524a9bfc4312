pub mod manager;

pub use manager::{BackfillReport, CorruptChunk, HistoryManager, ImportReport, OpenReport};
