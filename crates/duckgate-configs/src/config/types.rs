use super::defaults::*;
use serde::{Deserialize, Serialize};

/// Top-level duckgate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub auth: AuthSettings,
}

/// Settings for the dual-database connection topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the main database file. Empty = in-memory.
    #[serde(default)]
    pub database_path: String,

    /// Path to the credential store. Required and file-based; its schema is
    /// bootstrapped externally and only validated at startup.
    pub auth_database_path: String,

    /// Number of engine threads. Each pool allows threads * 2 open
    /// connections and keeps up to `threads` idle.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Access mode for the main database: "read_only" or "read_write".
    #[serde(default = "default_access_mode")]
    pub access_mode: String,

    /// Maximum engine memory, e.g. "4GB" or "512MB". Empty = engine default.
    #[serde(default)]
    pub memory_limit: String,

    /// Enable the engine's object cache for faster repeated scans.
    #[serde(default)]
    pub enable_object_cache: bool,

    /// Directory for temporary spill files. Empty = system default.
    #[serde(default)]
    pub temp_directory: String,

    /// Per-call timeout applied to every exec/query, in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

/// Settings for the authorizer's expiring caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// TTL for both the permission-decision and API-key caches, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_permission_cache_capacity")]
    pub permission_cache_capacity: u64,

    #[serde(default = "default_api_key_cache_capacity")]
    pub api_key_cache_capacity: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            permission_cache_capacity: default_permission_cache_capacity(),
            api_key_cache_capacity: default_api_key_cache_capacity(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            auth_database_path: String::new(),
            threads: default_threads(),
            access_mode: default_access_mode(),
            memory_limit: String::new(),
            enable_object_cache: false,
            temp_directory: String::new(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}
