//! Storage configuration types.

use serde::Deserialize;

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sqlx connection URL.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
    /// How long a connection waits on a locked database.
    pub busy_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:./data/fdr.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 5,
        }
    }
}

impl StorageConfig {
    /// Private in-memory database. A single connection keeps every query on
    /// the same database.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            busy_timeout_secs: 5,
        }
    }
}
