//! Merged-config validation
//!
//! Backend selection must come with the matching section fully populated;
//! a missing credential fails here, not on first use.

use anyhow::{bail, Result};

use crate::{RuntimeConfig, StorageBackend};

pub fn validate(config: &RuntimeConfig) -> Result<()> {
    match config.storage.backend {
        StorageBackend::Memory => {}
        StorageBackend::Fs => {
            let Some(fs) = &config.storage.fs else {
                bail!("fs backend selected but [storage.fs] is missing");
            };
            if fs.path.is_empty() {
                bail!("fs backend requires a non-empty path");
            }
        }
        StorageBackend::S3 => {
            let Some(s3) = &config.storage.s3 else {
                bail!("s3 backend selected but [storage.s3] is missing");
            };
            if s3.bucket.is_empty() {
                bail!("s3 backend requires a bucket");
            }
            if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
                bail!("s3 credentials require both access_key_id and secret_access_key");
            }
        }
        StorageBackend::R2 => {
            let Some(r2) = &config.storage.r2 else {
                bail!("r2 backend selected but [storage.r2] is missing (or R2_* env vars unset)");
            };
            if r2.bucket.is_empty() {
                bail!("r2 backend requires a bucket");
            }
            if r2.url.is_empty() {
                bail!("r2 backend requires an endpoint url");
            }
            if r2.access_key_id.is_empty() || r2.secret_access_key.is_empty() {
                bail!("r2 backend requires explicit credentials");
            }
        }
        StorageBackend::Sqlite => {
            let Some(sqlite) = &config.storage.sqlite else {
                bail!("sqlite backend selected but [storage.sqlite] is missing");
            };
            if sqlite.connection_string.is_empty() {
                bail!("sqlite backend requires a connection string");
            }
        }
    }

    if config.wal.max_buffer_size == 0 {
        bail!("wal.max_buffer_size must be at least 1");
    }
    if config.wal.max_buffer_bytes == 0 {
        bail!("wal.max_buffer_bytes must be at least 1");
    }
    match config.parquet.compression.as_str() {
        "snappy" | "zstd" | "none" | "uncompressed" => {}
        other => bail!("unsupported parquet compression: {other}"),
    }
    if config.retry.multiplier < 1.0 {
        bail!("retry.multiplier must be >= 1.0");
    }
    if config.breaker.failure_threshold == 0 || config.breaker.success_threshold == 0 {
        bail!("breaker thresholds must be at least 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FsConfig, R2Config, S3Config};

    #[test]
    fn backend_sections_required() {
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::Fs;
        assert!(validate(&config).is_err());
        config.storage.fs = Some(FsConfig {
            path: "/data".into(),
        });
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn s3_credentials_must_pair() {
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::S3;
        config.storage.s3 = Some(S3Config {
            bucket: "b".into(),
            access_key_id: Some("key".into()),
            ..S3Config::default()
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn r2_requires_everything() {
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::R2;
        config.storage.r2 = Some(R2Config {
            bucket: "b".into(),
            url: "https://x".into(),
            access_key_id: String::new(),
            secret_access_key: "s".into(),
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn bad_compression_rejected() {
        let mut config = RuntimeConfig::default();
        config.parquet.compression = "lzma".into();
        assert!(validate(&config).is_err());
    }
}
