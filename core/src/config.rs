//! Client configuration: TOML file, then environment overrides.
//!
//! ```toml
//! base_url = "https://api.example.com"
//! timeout_secs = 20
//! start_online = true
//!
//! [headers]
//! x-api-key = "..."
//!
//! [cache]
//! path = "/var/lib/app/netcache.json"
//! encryption_key = "passphrase"
//! ```
//!
//! Env overrides: `NETCACHE_BASE_URL`, `NETCACHE_TIMEOUT_SECS`,
//! `NETCACHE_CACHE_PATH`, `NETCACHE_CACHE_KEY`. Values that do not parse are
//! ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheStore;
use crate::cipher::{ChaChaCipher, Cipher};
use crate::connectivity::ConnectivityGate;
use crate::error::{CacheError, ConfigError};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    /// Request and resource timeout of the transport (default 20, at least 1).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Initial reachability (default true).
    #[serde(default = "default_start_online")]
    pub start_online: bool,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Durable cache file. Absent keeps the cache in memory.
    pub path: Option<PathBuf>,
    /// Passphrase. Present encrypts records at rest.
    pub encryption_key: Option<String>,
}

fn default_timeout_secs() -> u64 {
    20
}
fn default_start_online() -> bool {
    true
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
            headers: BTreeMap::new(),
            start_online: default_start_online(),
            cache: CacheConfig::default(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Read `path`, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("NETCACHE_BASE_URL").filter(|s| !s.is_empty()) {
            self.base_url = url;
        }
        if let Some(secs) = lookup("NETCACHE_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&secs| secs > 0)
        {
            self.timeout_secs = secs;
        }
        if let Some(path) = lookup("NETCACHE_CACHE_PATH").filter(|s| !s.is_empty()) {
            self.cache.path = Some(PathBuf::from(path));
        }
        if let Some(key) = lookup("NETCACHE_CACHE_KEY").filter(|s| !s.is_empty()) {
            self.cache.encryption_key = Some(key);
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn header_list(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn gate(&self) -> ConnectivityGate {
        ConnectivityGate::new(self.start_online)
    }

    pub fn open_cache(&self) -> Result<CacheStore, CacheError> {
        let cipher = self
            .cache
            .encryption_key
            .as_deref()
            .map(|key| Arc::new(ChaChaCipher::from_passphrase(key)) as Arc<dyn Cipher>);
        CacheStore::new(self.cache.path.clone(), cipher)
    }
}
