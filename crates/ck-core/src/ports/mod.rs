mod chunk_store;
mod clock;
mod hash;
mod payload_store;

pub use chunk_store::ChunkStorePort;
pub use clock::ClockPort;
pub use hash::ContentHashPort;
pub use payload_store::PayloadStorePort;
