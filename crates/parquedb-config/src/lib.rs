// parquedb-config - Unified runtime configuration
//
// Sources, highest priority first:
// 1. Environment variables (R2_*, JWKS_URI, PARQUEDB_*)
// 2. Config file named by PARQUEDB_CONFIG
// 3. ./parquedb.toml
// 4. Built-in defaults (memory backend)
//
// Validation runs on the merged result and fails eagerly: a dataset must
// never discover a missing credential on its first write.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod sources;
mod validation;

pub use sources::{apply_env_from, load_config};

/// Which object-storage backend a deployment points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Fs,
    S3,
    R2,
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "fs" => Ok(Self::Fs),
            "s3" => Ok(Self::S3),
            "r2" => Ok(Self::R2),
            "sqlite" => Ok(Self::Sqlite),
            other => anyhow::bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FsConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct R2Config {
    pub bucket: String,
    /// S3-compatible endpoint URL
    pub url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SqliteConfig {
    pub connection_string: String,
    #[serde(default)]
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub fs: Option<FsConfig>,
    #[serde(default)]
    pub s3: Option<S3Config>,
    #[serde(default)]
    pub r2: Option<R2Config>,
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalSettings {
    pub max_buffer_size: usize,
    pub max_buffer_bytes: usize,
    pub bulk_threshold: usize,
}

impl Default for WalSettings {
    fn default() -> Self {
        Self {
            max_buffer_size: 100,
            max_buffer_bytes: 64 * 1024,
            bulk_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParquetSettings {
    /// snappy (default), zstd or none
    pub compression: String,
}

impl Default for ParquetSettings {
    fn default() -> Self {
        Self {
            compression: "snappy".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
            jitter_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_ms: u64,
    pub failure_window_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
            failure_window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub max_cache_bytes: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_cache_bytes: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MigrateSettings {
    /// Bearer-token verification endpoint; without it every control-plane
    /// call is rejected as unauthorized.
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

/// Main runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub wal: WalSettings,
    #[serde(default)]
    pub parquet: ParquetSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub migrate: MigrateSettings,
}

impl RuntimeConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse config file")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}
