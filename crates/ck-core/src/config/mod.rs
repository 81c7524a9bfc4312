use serde::Deserialize;

/// Storage configuration consumed, not owned, by the history core.
///
/// The composition root builds this from whatever settings surface the
/// host application has; the core only reads it.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Entries per chunk; append opens a new chunk when the newest one
    /// reaches this capacity.
    pub chunk_capacity: usize,
    /// Count retention bound; 0 = unlimited (never "evict everything").
    pub max_entries: u64,
    /// Capture-time single-payload size bound in bytes; 0 = unlimited.
    pub max_payload_bytes: u64,
}

impl HistoryConfig {
    /// v1 defaults (keep stable; persisted histories depend on nothing
    /// here except the sentinel meaning of 0).
    pub fn defaults() -> Self {
        Self {
            chunk_capacity: 200,
            max_entries: 500,
            max_payload_bytes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HistoryConfig;

    #[test]
    fn defaults_keep_size_limit_unlimited() {
        let config = HistoryConfig::defaults();
        assert_eq!(config.chunk_capacity, 200);
        assert_eq!(config.max_entries, 500);
        assert_eq!(config.max_payload_bytes, 0);
    }

    #[test]
    fn deserializes_from_settings_json() {
        let config: HistoryConfig = serde_json::from_str(
            r#"{ "chunk_capacity": 10, "max_entries": 0, "max_payload_bytes": 1048576 }"#,
        )
        .expect("parse config");
        assert_eq!(config.chunk_capacity, 10);
        assert_eq!(config.max_entries, 0);
        assert_eq!(config.max_payload_bytes, 1_048_576);
    }
}
