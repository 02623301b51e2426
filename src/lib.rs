// parquedb - Embeddable event-sourced entity store
//
// One ParqueDB handle owns one dataset: an object-storage backend (wrapped
// with observation and a circuit breaker), the WAL, the entity store, the
// index subsystem and optionally a CDC feed mirroring the event stream.
//
// The heavy lifting lives in the member crates; this crate wires them
// together from a RuntimeConfig and re-exports the public surface.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use parquedb_cdc::{CdcProducer, CdcRecord, CdcSource};
use parquedb_config::{RuntimeConfig, StorageBackend};
use parquedb_core::event::{Event, EventOp};
use parquedb_migrate::{MigrationCoordinator, Migrator, TokenVerifier};
use parquedb_retry::{AbortToken, Retry};
use parquedb_storage::{
    observe, BreakerStore, CircuitBreaker, CircuitBreakerConfig, ObjectStore,
};
use parquedb_store::{CreateOptions, EntityStore, FindOptions, IndexSpec, StoreOptions};
use parquedb_wal::WalConfig;

pub use parquedb_cdc as cdc;
pub use parquedb_config as config;
pub use parquedb_index as index;
pub use parquedb_migrate as migrate;
pub use parquedb_retry as retry;
pub use parquedb_storage as storage;
pub use parquedb_store as store;
pub use parquedb_wal as wal;

pub use parquedb_core::{Entity, EntityRef, Error, Relationship, Ulid};
pub use parquedb_store::{
    DeleteOptions, FindResult, GetOptions, LinkOptions, SortOrder, SortSpec, UpdateOptions,
};

/// Build the configured backend and wrap it with the breaker and observer.
fn build_storage(config: &RuntimeConfig) -> Result<Arc<dyn ObjectStore>> {
    use parquedb_storage::backend;

    let base: Arc<dyn ObjectStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(backend::new_memory()?),
        StorageBackend::Fs => {
            let fs = config
                .storage
                .fs
                .as_ref()
                .context("fs backend selected without [storage.fs]")?;
            Arc::new(backend::new_fs(&fs.path)?)
        }
        StorageBackend::S3 => {
            let s3 = config
                .storage
                .s3
                .as_ref()
                .context("s3 backend selected without [storage.s3]")?;
            Arc::new(backend::new_s3(
                &s3.bucket,
                &s3.region,
                s3.prefix.as_deref(),
                s3.endpoint.as_deref(),
                s3.access_key_id.as_deref(),
                s3.secret_access_key.as_deref(),
            )?)
        }
        StorageBackend::R2 => {
            let r2 = config
                .storage
                .r2
                .as_ref()
                .context("r2 backend selected without [storage.r2]")?;
            Arc::new(backend::new_r2(
                &r2.bucket,
                &r2.url,
                &r2.access_key_id,
                &r2.secret_access_key,
            )?)
        }
        StorageBackend::Sqlite => {
            let sqlite = config
                .storage
                .sqlite
                .as_ref()
                .context("sqlite backend selected without [storage.sqlite]")?;
            Arc::new(backend::new_sqlite(&sqlite.connection_string, &sqlite.table)?)
        }
    };

    let breaker = Arc::new(CircuitBreaker::new(
        format!("storage-{}", base.backend_name()),
        CircuitBreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            success_threshold: config.breaker.success_threshold,
            reset_timeout: Duration::from_millis(config.breaker.reset_timeout_ms),
            failure_window: Duration::from_millis(config.breaker.failure_window_ms),
            is_failure: None,
            on_state_change: None,
        },
    ));
    let protected: Arc<dyn ObjectStore> = Arc::new(BreakerStore::new(base, breaker));
    Ok(observe(protected))
}

fn store_options(config: &RuntimeConfig, indexes: Vec<IndexSpec>) -> StoreOptions {
    StoreOptions {
        wal: WalConfig {
            max_buffer_size: config.wal.max_buffer_size,
            max_buffer_bytes: config.wal.max_buffer_bytes,
            bulk_threshold: config.wal.bulk_threshold,
        },
        compression: config.parquet.compression.clone(),
        indexes,
        cache_bytes: config.cache.max_cache_bytes,
        default_actor: "system".to_string(),
    }
}

/// Builder for a dataset handle
pub struct ParqueDBBuilder {
    config: RuntimeConfig,
    indexes: Vec<IndexSpec>,
    cdc: Option<CdcSource>,
}

impl ParqueDBBuilder {
    pub fn with_index(mut self, field: impl Into<String>, kind: parquedb_index::IndexKind) -> Self {
        self.indexes.push(IndexSpec {
            field: field.into(),
            kind,
        });
        self
    }

    /// Mirror every committed event into a CDC feed bound to this source.
    pub fn with_cdc(mut self, database: impl Into<String>, collection: impl Into<String>) -> Self {
        self.cdc = Some(CdcSource::with_collection("parquedb", database, collection));
        self
    }

    pub async fn open(self) -> Result<ParqueDB> {
        self.config.validate()?;
        let storage = build_storage(&self.config)?;
        let store = Arc::new(
            EntityStore::open(Arc::clone(&storage), store_options(&self.config, self.indexes))
                .await?,
        );

        let cdc = match self.cdc {
            Some(source) => {
                let producer = Arc::new(CdcProducer::new(source));
                let feed: Arc<parking_lot::Mutex<Vec<CdcRecord>>> = Arc::default();
                let mirror_producer = Arc::clone(&producer);
                let mirror_feed = Arc::clone(&feed);
                store.set_event_listener(move |event| {
                    let record = mirror_event(&mirror_producer, event);
                    mirror_feed.lock().push(record);
                });
                Some(CdcFeed { producer, feed })
            }
            None => None,
        };

        info!(backend = ?self.config.storage.backend, "opened parquedb dataset");
        Ok(ParqueDB { storage, store, cdc })
    }
}

fn mirror_event(producer: &CdcProducer, event: &Event) -> CdcRecord {
    let id = event.target.to_string();
    match event.op {
        EventOp::Create => producer.create(
            &id,
            event.after.clone().unwrap_or(serde_json::Value::Null),
            None,
        ),
        EventOp::Update => producer.update(
            &id,
            event.before.clone().unwrap_or(serde_json::Value::Null),
            event.after.clone().unwrap_or(serde_json::Value::Null),
            None,
        ),
        EventOp::Delete => producer.delete(
            &id,
            event.before.clone().unwrap_or(serde_json::Value::Null),
            None,
        ),
    }
}

/// The CDC side-channel of a dataset
pub struct CdcFeed {
    producer: Arc<CdcProducer>,
    feed: Arc<parking_lot::Mutex<Vec<CdcRecord>>>,
}

impl CdcFeed {
    pub fn producer(&self) -> &Arc<CdcProducer> {
        &self.producer
    }

    /// Take every record mirrored since the last drain.
    pub fn drain(&self) -> Vec<CdcRecord> {
        std::mem::take(&mut *self.feed.lock())
    }
}

/// One open dataset
pub struct ParqueDB {
    storage: Arc<dyn ObjectStore>,
    store: Arc<EntityStore>,
    cdc: Option<CdcFeed>,
}

impl ParqueDB {
    pub fn builder(config: RuntimeConfig) -> ParqueDBBuilder {
        ParqueDBBuilder {
            config,
            indexes: Vec::new(),
            cdc: None,
        }
    }

    pub async fn open(config: RuntimeConfig) -> Result<ParqueDB> {
        Self::builder(config).open().await
    }

    /// The entity store: create/get/update/delete/link/unlink/find.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// The wrapped storage plane (observed + circuit-broken).
    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    pub fn cdc(&self) -> Option<&CdcFeed> {
        self.cdc.as_ref()
    }

    /// Materialize buffers into the canonical Parquet artifacts.
    pub async fn flush(&self) -> Result<parquedb_store::MaterializeOutcome> {
        Ok(self.store.flush().await?)
    }

    /// Flush, then release caches. Idempotent.
    pub async fn close(&self) -> Result<()> {
        Ok(self.store.close().await?)
    }

    /// A migration coordinator whose jobs copy namespaces out of this
    /// dataset into a target named by URI (`memory:` or `fs:<root>`).
    pub fn migration_coordinator(&self, verifier: Arc<dyn TokenVerifier>) -> MigrationCoordinator {
        MigrationCoordinator::new(
            verifier,
            Arc::new(StoreMigrator {
                source: Arc::clone(&self.store),
            }),
        )
    }
}

/// Copies one namespace at a time into a freshly opened target dataset.
struct StoreMigrator {
    source: Arc<EntityStore>,
}

#[async_trait::async_trait]
impl Migrator for StoreMigrator {
    async fn migrate_namespace(&self, ns: &str, to: &str) -> parquedb_core::Result<u64> {
        let target = open_target(to).await?;
        let entities = self
            .source
            .find(ns, serde_json::json!({}), FindOptions::default())
            .await?;

        let items: Vec<serde_json::Value> = entities
            .items
            .iter()
            .map(|entity| {
                let mut doc = serde_json::Map::new();
                doc.insert("$type".into(), entity.entity_type.clone().into());
                doc.insert("name".into(), entity.name.clone().into());
                for (k, v) in &entity.data {
                    doc.insert(k.clone(), v.clone());
                }
                serde_json::Value::Object(doc)
            })
            .collect();
        let count = items.len() as u64;
        target
            .create_many(ns, items, CreateOptions::default())
            .await?;
        target.flush().await?;
        Ok(count)
    }
}

async fn open_target(to: &str) -> parquedb_core::Result<EntityStore> {
    use parquedb_storage::backend;
    let storage: Arc<dyn ObjectStore> = if to == "memory:" {
        Arc::new(backend::new_memory()?)
    } else if let Some(root) = to.strip_prefix("fs:") {
        Arc::new(backend::new_fs(root)?)
    } else {
        return Err(Error::InvalidInput(format!(
            "unsupported migration target: {to}"
        )));
    };
    EntityStore::open(storage, StoreOptions::default()).await
}

/// Run an operation with the default backoff policy: version conflicts and
/// transient storage failures retry with exponential backoff and jitter.
///
/// ```no_run
/// # async fn example(db: &parquedb::ParqueDB, id: parquedb::Ulid) -> anyhow::Result<()> {
/// use parquedb::store::UpdateOptions;
/// let updated = parquedb::with_retry(move |_attempt| async move {
///     db.store()
///         .update("posts", id, serde_json::json!({"$inc": {"views": 1}}),
///             UpdateOptions::default())
///         .await
/// })
/// .await?;
/// # Ok(()) }
/// ```
pub async fn with_retry<T, F, Fut>(op: F) -> std::result::Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = parquedb_core::Result<T>>,
{
    Retry::default()
        .run("parquedb-op", &AbortToken::new(), op)
        .await
        .map_err(Error::from)
}
