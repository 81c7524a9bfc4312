mod sha256;

pub use sha256::Sha256Engine;
