use super::types::GateConfig;
use std::env;
use std::fs;
use std::path::Path;

impl GateConfig {
    /// Load configuration from a TOML file.
    ///
    /// Note: environment overrides are applied separately via
    /// `apply_env_overrides()`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string and validate it.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: GateConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DUCKGATE_*` environment variable overrides on top of the
    /// file-based configuration. Call `validate()` again afterwards.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("DUCKGATE_DATABASE_PATH") {
            self.database.database_path = v;
        }
        if let Ok(v) = env::var("DUCKGATE_AUTH_DATABASE_PATH") {
            self.database.auth_database_path = v;
        }
        if let Ok(v) = env::var("DUCKGATE_THREADS") {
            if let Ok(threads) = v.parse() {
                self.database.threads = threads;
            }
        }
        if let Ok(v) = env::var("DUCKGATE_ACCESS_MODE") {
            self.database.access_mode = v;
        }
        if let Ok(v) = env::var("DUCKGATE_MEMORY_LIMIT") {
            self.database.memory_limit = v;
        }
        if let Ok(v) = env::var("DUCKGATE_QUERY_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.database.query_timeout_ms = ms;
            }
        }
        if let Ok(v) = env::var("DUCKGATE_CACHE_TTL_SECS") {
            if let Ok(secs) = v.parse() {
                self.auth.cache_ttl_secs = secs;
            }
        }
    }

    /// Validate configuration settings.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.auth_database_path.is_empty() {
            return Err(anyhow::anyhow!("auth_database_path is required"));
        }

        let valid_modes = ["read_only", "read_write"];
        if !valid_modes.contains(&self.database.access_mode.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid access_mode '{}'. Must be one of: {}",
                self.database.access_mode,
                valid_modes.join(", ")
            ));
        }

        if self.database.threads == 0 {
            return Err(anyhow::anyhow!("threads must be greater than 0"));
        }

        if self.database.query_timeout_ms == 0 {
            return Err(anyhow::anyhow!("query_timeout_ms must be greater than 0"));
        }

        if self.auth.cache_ttl_secs == 0 {
            return Err(anyhow::anyhow!("cache_ttl_secs must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [database]
        auth_database_path = "/tmp/auth.db"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = GateConfig::from_toml_str(MINIMAL).expect("minimal config should parse");
        assert_eq!(config.database.threads, 4);
        assert_eq!(config.database.access_mode, "read_write");
        assert_eq!(config.database.query_timeout_ms, 10_000);
        assert!(config.database.database_path.is_empty(), "defaults to in-memory");
        assert_eq!(config.auth.cache_ttl_secs, 300);
        assert_eq!(config.auth.permission_cache_capacity, 1000);
        assert_eq!(config.auth.api_key_cache_capacity, 500);
    }

    #[test]
    fn missing_auth_database_path_is_fatal() {
        let err = GateConfig::from_toml_str("[database]\ndatabase_path = \"/tmp/main.db\"\n")
            .unwrap_err();
        assert!(
            err.to_string().contains("auth_database_path"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn invalid_access_mode_is_rejected() {
        let toml = r#"
            [database]
            auth_database_path = "/tmp/auth.db"
            access_mode = "append_only"
        "#;
        let err = GateConfig::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("access_mode"), "unexpected error: {err}");
    }

    #[test]
    fn zero_threads_is_rejected() {
        let toml = r#"
            [database]
            auth_database_path = "/tmp/auth.db"
            threads = 0
        "#;
        assert!(GateConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
            [database]
            auth_database_path = "/tmp/auth.db"
            threads = 8
            memory_limit = "2GB"

            [auth]
            cache_ttl_secs = 60
            "#
        )
        .expect("write config");

        let config = GateConfig::from_file(file.path()).expect("config should load");
        assert_eq!(config.database.threads, 8);
        assert_eq!(config.database.memory_limit, "2GB");
        assert_eq!(config.auth.cache_ttl_secs, 60);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = GateConfig::from_toml_str(MINIMAL).expect("parse");
        std::env::set_var("DUCKGATE_THREADS", "16");
        std::env::set_var("DUCKGATE_MEMORY_LIMIT", "8GB");
        config.apply_env_overrides();
        std::env::remove_var("DUCKGATE_THREADS");
        std::env::remove_var("DUCKGATE_MEMORY_LIMIT");

        assert_eq!(config.database.threads, 16);
        assert_eq!(config.database.memory_limit, "8GB");
    }
}
