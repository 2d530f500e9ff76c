//! Engine configuration

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Cache and sequencing knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Identical feed fetches inside this window are skipped
    #[serde(default = "default_feed_debounce")]
    pub feed_debounce_ms: u64,

    /// Jobs requested per feed page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Full job detail stays fresh for this long
    #[serde(default = "default_detail_ttl")]
    pub detail_ttl_secs: u64,

    /// A detail fetch this soon after the previous one serves the cache, even when forced
    #[serde(default = "default_reentry_guard")]
    pub detail_reentry_guard_ms: u64,
}

/// Remote backend connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend HTTP API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional API key sent as a bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

// Defaults
fn default_feed_debounce() -> u64 { 500 }
fn default_page_size() -> u32 { 20 }
fn default_detail_ttl() -> u64 { 30 }
fn default_reentry_guard() -> u64 { 500 }
fn default_base_url() -> String { "http://localhost:54321".to_string() }
fn default_timeout() -> u64 { 30 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feed_debounce_ms: default_feed_debounce(),
            page_size: default_page_size(),
            detail_ttl_secs: default_detail_ttl(),
            detail_reentry_guard_ms: default_reentry_guard(),
        }
    }
}

impl SyncConfig {
    pub fn feed_debounce(&self) -> Duration {
        Duration::from_millis(self.feed_debounce_ms)
    }

    pub fn detail_ttl(&self) -> Duration {
        Duration::from_secs(self.detail_ttl_secs)
    }

    pub fn detail_reentry_guard(&self) -> Duration {
        Duration::from_millis(self.detail_reentry_guard_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("reading {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `MARKETPLACE_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("MARKETPLACE_BACKEND_URL") {
            self.backend.base_url = val;
        }
        if let Ok(val) = std::env::var("MARKETPLACE_API_KEY") {
            self.backend.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("MARKETPLACE_PAGE_SIZE") {
            if let Ok(size) = val.parse::<u32>() {
                self.sync.page_size = size;
            }
        }
        if let Ok(val) = std::env::var("MARKETPLACE_DETAIL_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.sync.detail_ttl_secs = secs;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.page_size == 0 {
            return Err(SyncError::Config("sync.page_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.feed_debounce(), Duration::from_millis(500));
        assert_eq!(config.sync.detail_ttl(), Duration::from_secs(30));
        assert_eq!(config.sync.page_size, 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\npage_size = 50\n\n[backend]\nbase_url = \"https://api.example.com\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sync.page_size, 50);
        assert_eq!(config.sync.detail_ttl_secs, 30);
        assert_eq!(config.backend.base_url, "https://api.example.com");
        assert_eq!(config.backend.timeout_secs, 30);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\npage_size = 0").unwrap();
        assert!(matches!(Config::load(file.path()), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/marketplace.toml")).unwrap();
        assert_eq!(config.sync.page_size, 20);
    }
}
