// Default value functions referenced by `#[serde(default = "...")]`.

pub fn default_threads() -> usize {
    4
}

pub fn default_access_mode() -> String {
    "read_write".to_string()
}

pub fn default_query_timeout_ms() -> u64 {
    10_000 // 10 seconds
}

pub fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes, the safety net even when explicit invalidation is missed
}

pub fn default_permission_cache_capacity() -> u64 {
    // ~10 roles * ~20 tables * 5 operations
    1000
}

pub fn default_api_key_cache_capacity() -> u64 {
    500
}
