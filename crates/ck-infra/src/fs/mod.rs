pub mod chunk_store;
pub mod payload_store;

pub use chunk_store::FsChunkStore;
pub use payload_store::FsPayloadStore;
