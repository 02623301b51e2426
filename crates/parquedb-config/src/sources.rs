//! Configuration source loading and merge order

use std::env;
use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::{R2Config, RuntimeConfig, StorageBackend};

const CONFIG_PATH_VAR: &str = "PARQUEDB_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "parquedb.toml";

/// Load configuration from all sources and validate the result.
pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = match config_file()? {
        Some(file_config) => file_config,
        None => RuntimeConfig::default(),
    };
    apply_env_from(&mut config, |name| env::var(name).ok());
    config.validate()?;
    Ok(config)
}

fn config_file() -> Result<Option<RuntimeConfig>> {
    if let Ok(path) = env::var(CONFIG_PATH_VAR) {
        debug!(path, "loading config file from {CONFIG_PATH_VAR}");
        return RuntimeConfig::from_file(Path::new(&path)).map(Some);
    }
    let default = Path::new(DEFAULT_CONFIG_FILE);
    if default.exists() {
        return RuntimeConfig::from_file(default).map(Some);
    }
    Ok(None)
}

/// Apply environment overrides through an injectable lookup (tests pass a
/// closure instead of touching the process environment).
pub fn apply_env_from<F>(config: &mut RuntimeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // R2 credentials switch the deployment onto the R2 backend
    if let (Some(access_key_id), Some(secret_access_key), Some(url)) = (
        lookup("R2_ACCESS_KEY_ID"),
        lookup("R2_SECRET_ACCESS_KEY"),
        lookup("R2_URL"),
    ) {
        let bucket = lookup("R2_BUCKET")
            .or_else(|| config.storage.r2.as_ref().map(|r2| r2.bucket.clone()))
            .unwrap_or_default();
        config.storage.backend = StorageBackend::R2;
        config.storage.r2 = Some(R2Config {
            bucket,
            url,
            access_key_id,
            secret_access_key,
        });
    }

    if let Some(uri) = lookup("JWKS_URI") {
        config.migrate.jwks_uri = Some(uri);
    }

    if let Some(backend) = lookup("PARQUEDB_STORAGE_BACKEND") {
        if let Ok(parsed) = backend.parse() {
            config.storage.backend = parsed;
        }
    }
    if let Some(path) = lookup("PARQUEDB_FS_ROOT") {
        config.storage.fs = Some(crate::FsConfig { path });
    }
    if let Some(value) = lookup("PARQUEDB_WAL_MAX_BUFFER_SIZE").and_then(|v| v.parse().ok()) {
        config.wal.max_buffer_size = value;
    }
    if let Some(value) = lookup("PARQUEDB_WAL_MAX_BUFFER_BYTES").and_then(|v| v.parse().ok()) {
        config.wal.max_buffer_bytes = value;
    }
    if let Some(value) = lookup("PARQUEDB_BULK_THRESHOLD").and_then(|v| v.parse().ok()) {
        config.wal.bulk_threshold = value;
    }
    if let Some(value) = lookup("PARQUEDB_PARQUET_COMPRESSION") {
        config.parquet.compression = value;
    }
}
