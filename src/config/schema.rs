//! Configuration schema for netenrich
//!
//! Configuration is stored at `~/.config/netenrich/config.toml`

use crate::error::{EnrichError, EnrichResult};
use crate::registry::default_base_url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Pipeline settings
    pub enrichment: EnrichmentConfig,

    /// Lookup cache settings
    pub cache: CacheConfig,

    /// Progress tracking settings
    pub progress: ProgressConfig,

    /// Registry client settings
    pub registry: RegistryConfig,
}

impl Config {
    /// Check value ranges; `path` is reported in the error
    pub fn validate(&self, path: &Path) -> EnrichResult<()> {
        let invalid = |reason: String| EnrichError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        };

        let e = &self.enrichment;
        if e.parallelism == 0 {
            return Err(invalid("enrichment.parallelism must be at least 1".to_string()));
        }
        if e.throttle_rate == 0 {
            return Err(invalid("enrichment.throttle_rate must be at least 1".to_string()));
        }
        if e.cache_ttl_hours == 0 {
            return Err(invalid("enrichment.cache_ttl_hours must be at least 1".to_string()));
        }
        if e.max_attempts == 0 {
            return Err(invalid("enrichment.max_attempts must be at least 1".to_string()));
        }
        if e.registries.is_empty() {
            return Err(invalid("enrichment.registries must not be empty".to_string()));
        }
        for name in &e.registries {
            if default_base_url(name).is_none() && !self.registry.base_urls.contains_key(name) {
                return Err(invalid(format!(
                    "registry '{}' has no known RDAP endpoint; set registry.base_urls.{}",
                    name, name
                )));
            }
        }
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(invalid(format!(
                "general.log_format must be \"text\" or \"json\", got \"{}\"",
                self.general.log_format
            )));
        }

        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Enrichment pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Number of concurrent workers
    pub parallelism: usize,

    /// Aggregate registry lookups per second
    pub throttle_rate: u32,

    /// Maximum age of a served cache entry
    pub cache_ttl_hours: u32,

    /// Registries to consult, in order
    pub registries: Vec<String>,

    /// Attempts per lookup, including the first
    pub max_attempts: u32,

    /// First retry delay in milliseconds (doubles per retry)
    pub initial_backoff_ms: u64,

    /// Retry delay ceiling in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            throttle_rate: 5,
            cache_ttl_hours: 168,
            registries: ["arin", "ripe", "apnic", "lacnic", "afrinic"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

/// Lookup cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache file (defaults to the state directory)
    pub path: Option<PathBuf>,

    /// Puts between batch flushes
    pub flush_every: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_every: 25,
        }
    }
}

/// Progress tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Progress file (defaults to the state directory)
    pub path: Option<PathBuf>,

    /// Processed keys between periodic flushes
    pub flush_every: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_every: crate::progress::DEFAULT_FLUSH_EVERY,
        }
    }
}

/// Registry client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// User-Agent sent with every request
    pub user_agent: String,

    /// Registry name → RDAP base URL overrides
    pub base_urls: HashMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: format!("netenrich/{}", env!("CARGO_PKG_VERSION")),
            base_urls: HashMap::new(),
        }
    }
}
