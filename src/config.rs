//! Crate configuration.
//!
//! All configuration is explicit and dependency-injected; there is no
//! process-wide state. The structs deserialize from whatever config format
//! the embedding application uses.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::fetch::{FetchConfig, SCHEMA_VERSION};
use crate::limit::RateLimitConfig;

/// Environment variable overriding the default cache location.
pub const CACHE_DIR_ENV: &str = "PADDOCK_CACHE";

/// Top-level configuration for the default component stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddockConfig {
    /// Directory backing the persistent cache store.
    pub cache_dir: PathBuf,
    /// Serve from cache only; misses fail instead of hitting the network.
    pub offline: bool,
    /// Ignore existing cached entries and refetch.
    pub force_refresh: bool,
    /// Expected cache schema version; bump on incompatible payload changes.
    pub schema_version: u32,
    pub rate_limit: RateLimitConfig,
}

impl Default for PaddockConfig {
    fn default() -> Self {
        PaddockConfig {
            cache_dir: default_cache_dir(),
            offline: false,
            force_refresh: false,
            schema_version: SCHEMA_VERSION,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl PaddockConfig {
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            offline: self.offline,
            force_refresh: self.force_refresh,
            schema_version: self.schema_version,
        }
    }
}

/// Default cache directory: the `PADDOCK_CACHE` environment variable if
/// set, otherwise `~/.cache/paddock`, otherwise a local `paddock-cache`
/// directory.
pub fn default_cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        let cache_root = PathBuf::from(home).join(".cache");
        if cache_root.is_dir() {
            return cache_root.join("paddock");
        }
    }
    PathBuf::from("paddock-cache")
}
