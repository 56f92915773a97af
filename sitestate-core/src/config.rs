//! Configuration for where and how build-state snapshots are cached
//!
//! A `CacheConfig` selects the storage backend, the cache directory, the key
//! the snapshot is stored under and the compression applied to it. It can be
//! built in code or read from `SITESTATE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Result, StoreError};

/// Cache directory used when none is configured, relative to the site root
pub const DEFAULT_CACHE_DIR: &str = ".cache/redux";

/// Well-known key the snapshot is stored under
pub const DEFAULT_SNAPSHOT_KEY: &str = "redux.state";

pub const ENV_CACHE_DIR: &str = "SITESTATE_CACHE_DIR";
pub const ENV_SNAPSHOT_KEY: &str = "SITESTATE_SNAPSHOT_KEY";
pub const ENV_COMPRESSION: &str = "SITESTATE_COMPRESSION";
pub const ENV_COMPRESSION_LEVEL: &str = "SITESTATE_COMPRESSION_LEVEL";

/// Enumeration of supported cache backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheBackend {
    /// Files under the cache directory
    Local,
    /// Process memory; nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionKind {
    Gzip,
    None,
}

impl FromStr for CompressionKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(CompressionKind::Gzip),
            "none" | "off" => Ok(CompressionKind::None),
            other => Err(StoreError::config(format!(
                "Unknown compression '{other}', expected 'gzip' or 'none'"
            ))),
        }
    }
}

/// Configuration structure for the snapshot cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Directory for the local backend (defaults to `.cache/redux`)
    pub cache_dir: Option<PathBuf>,
    pub snapshot_key: String,
    pub compression: CompressionKind,
    /// Gzip level 0-9 (defaults to 6)
    pub compression_level: Option<u32>,
}

impl CacheConfig {
    /// Local filesystem cache in the default directory, gzip-compressed
    pub fn default_local() -> Self {
        CacheConfig {
            backend: CacheBackend::Local,
            cache_dir: None,
            snapshot_key: DEFAULT_SNAPSHOT_KEY.to_string(),
            compression: CompressionKind::Gzip,
            compression_level: None,
        }
    }

    /// In-memory cache, uncompressed
    pub fn in_memory() -> Self {
        CacheConfig {
            backend: CacheBackend::Memory,
            cache_dir: None,
            snapshot_key: DEFAULT_SNAPSHOT_KEY.to_string(),
            compression: CompressionKind::None,
            compression_level: None,
        }
    }

    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, cache_dir: P) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn with_snapshot_key<S: Into<String>>(mut self, key: S) -> Self {
        self.snapshot_key = key.into();
        self
    }

    pub fn with_compression(mut self, compression: CompressionKind) -> Self {
        self.compression = compression;
        self
    }

    /// The configured cache directory, or the default one
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR))
    }

    /// Build a local configuration from the process environment
    ///
    /// Reads `SITESTATE_CACHE_DIR`, `SITESTATE_SNAPSHOT_KEY`,
    /// `SITESTATE_COMPRESSION` and `SITESTATE_COMPRESSION_LEVEL`; unset
    /// variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a local configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default_local();

        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(key) = lookup(ENV_SNAPSHOT_KEY) {
            config.snapshot_key = key;
        }
        if let Some(compression) = lookup(ENV_COMPRESSION) {
            config.compression = compression.parse()?;
        }
        if let Some(level) = lookup(ENV_COMPRESSION_LEVEL) {
            let level = level.trim().parse::<u32>().map_err(|e| {
                StoreError::config(format!("Invalid {ENV_COMPRESSION_LEVEL} '{level}': {e}"))
            })?;
            config.compression_level = Some(level);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let key = self.snapshot_key.as_str();
        if key.is_empty() {
            return Err(StoreError::config("Snapshot key cannot be empty"));
        }
        if key == "." || key == ".." || key.contains(['/', '\\']) {
            return Err(StoreError::config(format!(
                "Snapshot key '{key}' must be a plain file name"
            )));
        }
        if let Some(level) = self.compression_level {
            if level > 9 {
                return Err(StoreError::config(format!(
                    "Compression level {level} is out of range 0-9"
                )));
            }
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::default_local()
    }
}
