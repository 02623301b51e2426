//! The entity/relationship store
//!
//! Single writer per namespace: every mutation computes its event, appends
//! it to the WAL (the failure point), then commits to the in-memory working
//! set and the time-travel arena. Reads never touch the WAL.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, info};

use parquedb_core::clock::{Clock, SystemClock};
use parquedb_core::error::{Error, Result};
use parquedb_core::event::{Event, EventOp, EventTarget};
use parquedb_core::parquet as pq;
use parquedb_core::types::{default_reverse, Entity, EntityRef, Relationship};
use parquedb_core::ulid::{Ulid, UlidGenerator};
use parquedb_index::{IndexCache, IndexKind, IndexReader};
use parquedb_storage::ObjectStore;
use parquedb_wal::{WalConfig, WalManager};

use crate::links::detect_inline_links;
use crate::state::StoreState;
use crate::time_travel::TimeTravel;
use crate::update::{apply_patch, LinkOp};

/// Which secondary indexes the materializer maintains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub field: String,
    pub kind: IndexKind,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub wal: WalConfig,
    /// Parquet codec name: snappy (default), zstd, none
    pub compression: String,
    pub indexes: Vec<IndexSpec>,
    /// Byte budget of the shared index cache
    pub cache_bytes: usize,
    pub default_actor: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            wal: WalConfig::default(),
            compression: "snappy".to_string(),
            indexes: Vec::new(),
            cache_bytes: 8 * 1024 * 1024,
            default_actor: "system".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub include_deleted: bool,
    /// Reconstruct state as of this timestamp (epoch nanoseconds)
    pub as_of: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub actor: Option<String>,
    pub expected_version: Option<u64>,
    pub upsert: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub actor: Option<String>,
    pub hard: bool,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    pub actor: Option<String>,
    pub data: Option<Map<String, Value>>,
    /// Override the default `predicate + "s"` reverse label
    pub reverse: Option<String>,
}

type EventListener = Box<dyn Fn(&Event) + Send + Sync>;

pub struct EntityStore {
    storage: Arc<dyn ObjectStore>,
    wal: Arc<WalManager>,
    clock: Arc<dyn Clock>,
    ids: Arc<UlidGenerator>,
    options: StoreOptions,
    pub(crate) state: RwLock<StoreState>,
    pub(crate) time_travel: TimeTravel,
    pub(crate) index_reader: IndexReader,
    event_listener: Mutex<Option<EventListener>>,
    /// Mutations since the last materialization; indexes are only trusted
    /// for candidate selection when this is zero.
    pub(crate) dirty: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl EntityStore {
    /// Open a dataset: hydrate the working set from the materialized
    /// artifacts, then replay unflushed WAL batches and staged bulk
    /// artifacts on top.
    pub async fn open(storage: Arc<dyn ObjectStore>, options: StoreOptions) -> Result<Self> {
        Self::open_with(
            storage,
            options,
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new()),
        )
        .await
    }

    pub async fn open_with(
        storage: Arc<dyn ObjectStore>,
        options: StoreOptions,
        clock: Arc<dyn Clock>,
        ids: Arc<UlidGenerator>,
    ) -> Result<Self> {
        let wal = Arc::new(WalManager::with_clock(
            Arc::clone(&storage),
            options.wal.clone(),
            Arc::clone(&clock),
            Arc::clone(&ids),
        ));
        let cache = Arc::new(IndexCache::new(options.cache_bytes));
        let store = Self {
            index_reader: IndexReader::new(Arc::clone(&storage), cache),
            storage,
            wal,
            clock,
            ids,
            options,
            state: RwLock::new(StoreState::default()),
            time_travel: TimeTravel::new(),
            event_listener: Mutex::new(None),
            dirty: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };
        store.hydrate().await?;
        Ok(store)
    }

    /// Mirror every committed event (CDC wiring point).
    pub fn set_event_listener<F>(&self, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        *self.event_listener.lock() = Some(Box::new(listener));
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Read an artifact that may legitimately be absent.
    async fn read_optional(&self, path: &str) -> Result<Option<bytes::Bytes>> {
        match self.storage.read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn hydrate(&self) -> Result<()> {
        // 1. materialized snapshots
        if let Some(bytes) = self.read_optional("data.parquet").await? {
            let batches = pq::read_parquet(bytes.to_vec())
                .map_err(|e| Error::Codec(format!("data.parquet: {e}")))?;
            let mut state = self.state.write();
            for batch in &batches {
                for entity in pq::batch_to_entities(batch)? {
                    state
                        .namespace_mut(&entity.ns.clone())
                        .entities
                        .insert(entity.id, entity);
                }
            }
        }
        if let Some(bytes) = self.read_optional("rels.parquet").await? {
            let batches = pq::read_parquet(bytes.to_vec())
                .map_err(|e| Error::Codec(format!("rels.parquet: {e}")))?;
            let mut state = self.state.write();
            for batch in &batches {
                for row in pq::batch_to_relationships(batch)? {
                    let ns = row.source.ns.clone();
                    state.namespace_mut(&ns).edges.push(Relationship {
                        reverse: default_reverse(&row.source_field),
                        from: row.source,
                        predicate: row.source_field,
                        to: row.target,
                        version: 1,
                        created_at: row.created_at,
                        created_by: String::new(),
                        updated_at: row.created_at,
                        updated_by: String::new(),
                        deleted_at: None,
                        deleted_by: None,
                        data: None,
                    });
                }
            }
        }
        if let Some(bytes) = self.read_optional("events.parquet").await? {
            let batches = pq::read_parquet(bytes.to_vec())
                .map_err(|e| Error::Codec(format!("events.parquet: {e}")))?;
            for batch in &batches {
                let events = pq::batch_to_events(batch)?;
                let mut by_ns: std::collections::HashMap<String, Vec<Event>> = Default::default();
                for event in events {
                    by_ns
                        .entry(event.target.primary().ns.clone())
                        .or_default()
                        .push(event);
                }
                for (ns, events) in by_ns {
                    self.time_travel.hydrate(&ns, events);
                }
            }
        }

        // 2. unflushed WAL batches replay over the snapshot
        let mut replayed = 0usize;
        for batch in self.wal.wal().list_unflushed().await? {
            for event in batch.events {
                self.apply_event_to_state(&event)?;
                self.time_travel.append(&batch.ns, event);
                replayed += 1;
            }
        }

        // 3. staged bulk artifacts
        for record in self.wal.pending().list().await? {
            let bytes = self.storage.read(&record.path).await?;
            let batches = pq::read_parquet(bytes.to_vec())
                .map_err(|e| Error::Codec(format!("{}: {e}", record.path)))?;
            let mut state = self.state.write();
            for batch in &batches {
                for entity in pq::batch_to_entities(batch)? {
                    state
                        .namespace_mut(&entity.ns.clone())
                        .entities
                        .insert(entity.id, entity);
                }
            }
        }

        if replayed > 0 {
            info!(replayed, "replayed unflushed WAL events");
        }
        Ok(())
    }

    fn apply_event_to_state(&self, event: &Event) -> Result<()> {
        let mut state = self.state.write();
        match &event.target {
            EventTarget::Entity(entity_ref) => match (&event.op, &event.after) {
                (EventOp::Delete, None) => {
                    state
                        .namespace_mut(&entity_ref.ns)
                        .entities
                        .remove(&entity_ref.id);
                }
                (_, Some(doc)) => {
                    let entity = Entity::from_document(doc)?;
                    state
                        .namespace_mut(&entity_ref.ns)
                        .entities
                        .insert(entity.id, entity);
                }
                (_, None) => {}
            },
            EventTarget::Relationship { from, .. } => {
                let ns = state.namespace_mut(&from.ns);
                match &event.after {
                    Some(doc) => {
                        let edge = Relationship::from_document(doc)?;
                        match ns.edge_position(&edge.from, &edge.predicate, &edge.to) {
                            Some(pos) => ns.edges[pos] = edge,
                            None => ns.edges.push(edge),
                        }
                    }
                    None => {
                        if let Some(before) = &event.before {
                            let edge = Relationship::from_document(before)?;
                            if let Some(pos) = ns.edge_position(&edge.from, &edge.predicate, &edge.to)
                            {
                                ns.edges.remove(pos);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidInput("store is closed".into()));
        }
        Ok(())
    }

    fn actor(&self, explicit: &Option<String>) -> String {
        explicit
            .clone()
            .unwrap_or_else(|| self.options.default_actor.clone())
    }

    pub(crate) fn next_event_id(&self) -> Ulid {
        self.ids.generate(self.clock.now_ms() as u64)
    }

    /// Append to the WAL first; only then touch state.
    async fn commit_event(&self, ns: &str, event: Event) -> Result<()> {
        self.wal.append(ns, event.clone()).await?;
        self.apply_event_to_state(&event)?;
        self.time_travel.append(ns, event.clone());
        self.dirty.fetch_add(1, Ordering::Relaxed);
        if let Some(listener) = &*self.event_listener.lock() {
            listener(&event);
        }
        Ok(())
    }

    /// Create an entity. `data` must carry `$type` and `name`; values shaped
    /// like entity references become link calls.
    pub async fn create(&self, ns: &str, data: Value, opts: CreateOptions) -> Result<Entity> {
        self.ensure_open()?;
        let mut fields = data
            .as_object()
            .cloned()
            .ok_or_else(|| Error::InvalidInput("create data must be an object".into()))?;
        let entity_type = fields
            .remove("$type")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::InvalidInput("entity requires a string $type".into()))?;
        // preserved verbatim, even when empty or whitespace
        let name = fields
            .remove("name")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::InvalidInput("entity requires a string name".into()))?;

        let inline_links = detect_inline_links(&fields);
        let actor = self.actor(&opts.actor);
        let now = self.clock.now_ns();
        let entity = Entity {
            ns: ns.to_string(),
            id: self.next_event_id(),
            entity_type,
            name,
            version: 1,
            created_at: now,
            created_by: actor.clone(),
            updated_at: now,
            updated_by: actor.clone(),
            deleted_at: None,
            deleted_by: None,
            data: fields,
        };

        let event = Event {
            id: self.next_event_id(),
            ts: now,
            op: EventOp::Create,
            target: EventTarget::Entity(entity.entity_ref()),
            before: None,
            after: Some(entity.to_document()),
            actor: actor.clone(),
            metadata: None,
        };
        self.commit_event(ns, event).await?;

        for link in inline_links {
            self.link(
                &entity.path(),
                &link.predicate,
                &link.target.to_string(),
                LinkOptions {
                    actor: Some(actor.clone()),
                    ..LinkOptions::default()
                },
            )
            .await?;
        }
        debug!(ns, id = %entity.id, "created entity");
        Ok(entity)
    }

    /// Bulk create. At or above the WAL's bulk threshold the rows stream to
    /// a staging Parquet artifact and bypass the event buffer.
    pub async fn create_many(
        &self,
        ns: &str,
        items: Vec<Value>,
        opts: CreateOptions,
    ) -> Result<Vec<Entity>> {
        self.ensure_open()?;
        if items.len() < self.wal.config().bulk_threshold {
            let mut created = Vec::with_capacity(items.len());
            for item in items {
                created.push(self.create(ns, item, opts.clone()).await?);
            }
            return Ok(created);
        }

        let actor = self.actor(&opts.actor);
        let now = self.clock.now_ns();
        let mut entities = Vec::with_capacity(items.len());
        for item in items {
            let mut fields = item
                .as_object()
                .cloned()
                .ok_or_else(|| Error::InvalidInput("create data must be an object".into()))?;
            let entity_type = fields
                .remove("$type")
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| Error::InvalidInput("entity requires a string $type".into()))?;
            let name = fields
                .remove("name")
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| Error::InvalidInput("entity requires a string name".into()))?;
            entities.push(Entity {
                ns: ns.to_string(),
                id: self.next_event_id(),
                entity_type,
                name,
                version: 1,
                created_at: now,
                created_by: actor.clone(),
                updated_at: now,
                updated_by: actor.clone(),
                deleted_at: None,
                deleted_by: None,
                data: fields,
            });
        }

        // stage the rows as a Parquet artifact, then record the range
        let staging_path = format!("_staging/{ns}/{}.parquet", self.next_event_id());
        let batch = pq::entities_to_batch(&entities)?;
        let bytes = pq::write_parquet(&[batch])
            .map_err(|e| Error::Codec(format!("staging parquet: {e}")))?;
        self.storage
            .write_conditional(&staging_path, bytes.into(), None)
            .await?;
        self.wal
            .record_bulk(ns, &staging_path, entities.len() as u64)
            .await?;

        let mut state = self.state.write();
        for entity in &entities {
            state
                .namespace_mut(ns)
                .entities
                .insert(entity.id, entity.clone());
        }
        drop(state);
        self.dirty.fetch_add(1, Ordering::Relaxed);
        info!(ns, count = entities.len(), "bulk-created entities via staging artifact");
        Ok(entities)
    }

    /// Fetch one entity. Soft-deleted entities are hidden unless requested;
    /// `as_of` delegates to the time-travel engine.
    pub async fn get(&self, ns: &str, id: Ulid, opts: GetOptions) -> Result<Option<Entity>> {
        self.ensure_open()?;
        if let Some(as_of) = opts.as_of {
            let path = format!("{ns}/{id}");
            let snapshot = self.time_travel.get(ns, &path, as_of)?;
            return Ok(snapshot.filter(|e| opts.include_deleted || !e.is_deleted()));
        }
        let state = self.state.read();
        Ok(state
            .entity(ns, id)
            .filter(|e| opts.include_deleted || !e.is_deleted())
            .cloned())
    }

    /// Apply a patch with optimistic concurrency.
    pub async fn update(
        &self,
        ns: &str,
        id: Ulid,
        patch: Value,
        opts: UpdateOptions,
    ) -> Result<Entity> {
        self.ensure_open()?;
        let current = {
            let state = self.state.read();
            state.entity(ns, id).filter(|e| !e.is_deleted()).cloned()
        };
        let Some(current) = current else {
            if opts.upsert {
                return self.upsert_from_patch(ns, patch, &opts).await;
            }
            return Err(Error::NotFound(format!("{ns}/{id}")));
        };

        if let Some(expected) = opts.expected_version {
            if expected != current.version {
                return Err(Error::VersionMismatch {
                    expected,
                    actual: current.version,
                });
            }
        }

        // the patch sees user fields plus the mutable name
        let mut doc = current.data.clone();
        doc.insert("name".into(), Value::String(current.name.clone()));
        let outcome = apply_patch(&mut doc, &patch)?;
        let name = doc
            .remove("name")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Error::InvalidInput("name must remain a string".into()))?;
        doc.remove("$type");

        let actor = self.actor(&opts.actor);
        let now = self.clock.now_ns();
        let mut updated = current.clone();
        updated.name = name;
        updated.data = doc;
        updated.version += 1;
        updated.updated_at = now;
        updated.updated_by = actor.clone();

        let event = Event {
            id: self.next_event_id(),
            ts: now,
            op: EventOp::Update,
            target: EventTarget::Entity(updated.entity_ref()),
            before: Some(current.to_document()),
            after: Some(updated.to_document()),
            actor: actor.clone(),
            metadata: None,
        };
        self.commit_event(ns, event).await?;
        self.run_link_ops(&updated.path(), &outcome.links, &actor).await?;
        Ok(updated)
    }

    async fn upsert_from_patch(
        &self,
        ns: &str,
        patch: Value,
        opts: &UpdateOptions,
    ) -> Result<Entity> {
        // coerce the patch into create data: $set fields plus plain fields
        let clauses = patch
            .as_object()
            .ok_or_else(|| Error::InvalidInput("patch must be an object".into()))?;
        let mut data = Map::new();
        for (key, value) in clauses {
            match key.as_str() {
                "$set" => {
                    for (k, v) in value
                        .as_object()
                        .ok_or_else(|| Error::InvalidInput("$set must be an object".into()))?
                    {
                        data.insert(k.clone(), v.clone());
                    }
                }
                other if other.starts_with('$') => {}
                _ => {
                    data.insert(key.clone(), value.clone());
                }
            }
        }
        self.create(
            ns,
            Value::Object(data),
            CreateOptions {
                actor: opts.actor.clone(),
            },
        )
        .await
    }

    async fn run_link_ops(&self, from: &str, ops: &[LinkOp], actor: &str) -> Result<()> {
        for op in ops {
            if op.unlink {
                self.unlink(
                    from,
                    &op.predicate,
                    &op.target,
                    LinkOptions {
                        actor: Some(actor.to_string()),
                        ..LinkOptions::default()
                    },
                )
                .await?;
            } else {
                self.link(
                    from,
                    &op.predicate,
                    &op.target,
                    LinkOptions {
                        actor: Some(actor.to_string()),
                        ..LinkOptions::default()
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Soft delete by default; `hard` removes the row and cascades to
    /// incident relationships. Returns whether the entity existed.
    pub async fn delete(&self, ns: &str, id: Ulid, opts: DeleteOptions) -> Result<bool> {
        self.ensure_open()?;
        let current = {
            let state = self.state.read();
            state.entity(ns, id).cloned()
        };
        let Some(current) = current else {
            return Ok(false);
        };
        if current.is_deleted() && !opts.hard {
            return Ok(false);
        }
        if let Some(expected) = opts.expected_version {
            if expected != current.version {
                return Err(Error::VersionMismatch {
                    expected,
                    actual: current.version,
                });
            }
        }

        let actor = self.actor(&opts.actor);
        let now = self.clock.now_ns();
        let entity_ref = current.entity_ref();

        // cascade: incident edges first, so the entity event is last in the log
        let incident: Vec<Relationship> = {
            let state = self.state.read();
            state
                .namespaces
                .values()
                .flat_map(|n| n.edges.iter())
                .filter(|e| !e.is_deleted() && (e.from == entity_ref || e.to == entity_ref))
                .cloned()
                .collect()
        };
        for edge in incident {
            self.delete_edge(&edge, opts.hard, &actor, now).await?;
        }

        let event = if opts.hard {
            Event {
                id: self.next_event_id(),
                ts: now,
                op: EventOp::Delete,
                target: EventTarget::Entity(entity_ref),
                before: Some(current.to_document()),
                after: None,
                actor,
                metadata: None,
            }
        } else {
            let mut deleted = current.clone();
            deleted.version += 1;
            deleted.deleted_at = Some(now);
            deleted.deleted_by = Some(actor.clone());
            deleted.updated_at = now;
            deleted.updated_by = actor.clone();
            Event {
                id: self.next_event_id(),
                ts: now,
                op: EventOp::Delete,
                target: EventTarget::Entity(entity_ref),
                before: Some(current.to_document()),
                after: Some(deleted.to_document()),
                actor,
                metadata: None,
            }
        };
        self.commit_event(ns, event).await?;
        Ok(true)
    }

    async fn delete_edge(
        &self,
        edge: &Relationship,
        hard: bool,
        actor: &str,
        now: i64,
    ) -> Result<()> {
        let after = if hard {
            None
        } else {
            let mut deleted = edge.clone();
            deleted.version += 1;
            deleted.deleted_at = Some(now);
            deleted.deleted_by = Some(actor.to_string());
            deleted.updated_at = now;
            deleted.updated_by = actor.to_string();
            Some(deleted.to_document())
        };
        let event = Event {
            id: self.next_event_id(),
            ts: now,
            op: EventOp::Delete,
            target: EventTarget::Relationship {
                from: edge.from.clone(),
                predicate: edge.predicate.clone(),
                to: edge.to.clone(),
            },
            before: Some(edge.to_document()),
            after,
            actor: actor.to_string(),
            metadata: None,
        };
        self.commit_event(&edge.from.ns.clone(), event).await
    }

    /// Idempotent link. Re-linking a live edge is a no-op; a soft-deleted
    /// edge is revived with a version bump and fresh edge data.
    pub async fn link(
        &self,
        from: &str,
        predicate: &str,
        to: &str,
        opts: LinkOptions,
    ) -> Result<Relationship> {
        self.ensure_open()?;
        let from_ref: EntityRef = from.parse()?;
        let to_ref: EntityRef = to.parse()?;
        let actor = self.actor(&opts.actor);
        let now = self.clock.now_ns();

        let existing = {
            let state = self.state.read();
            state.namespace(&from_ref.ns).and_then(|ns| {
                ns.edge_position(&from_ref, predicate, &to_ref)
                    .map(|pos| ns.edges[pos].clone())
            })
        };

        let edge = match existing {
            Some(edge) if !edge.is_deleted() => return Ok(edge),
            Some(mut edge) => {
                // revive
                edge.version += 1;
                edge.deleted_at = None;
                edge.deleted_by = None;
                edge.updated_at = now;
                edge.updated_by = actor.clone();
                edge.data = opts.data.clone();
                if let Some(reverse) = &opts.reverse {
                    edge.reverse = reverse.clone();
                }
                edge
            }
            None => Relationship {
                from: from_ref.clone(),
                predicate: predicate.to_string(),
                reverse: opts
                    .reverse
                    .clone()
                    .unwrap_or_else(|| default_reverse(predicate)),
                to: to_ref,
                version: 1,
                created_at: now,
                created_by: actor.clone(),
                updated_at: now,
                updated_by: actor.clone(),
                deleted_at: None,
                deleted_by: None,
                data: opts.data.clone(),
            },
        };

        let event = Event {
            id: self.next_event_id(),
            ts: now,
            op: EventOp::Create,
            target: EventTarget::Relationship {
                from: edge.from.clone(),
                predicate: edge.predicate.clone(),
                to: edge.to.clone(),
            },
            before: None,
            after: Some(edge.to_document()),
            actor,
            metadata: None,
        };
        self.commit_event(&from_ref.ns, event).await?;
        Ok(edge)
    }

    /// Idempotent unlink (soft delete). Returns whether a live edge existed.
    pub async fn unlink(
        &self,
        from: &str,
        predicate: &str,
        to: &str,
        opts: LinkOptions,
    ) -> Result<bool> {
        self.ensure_open()?;
        let from_ref: EntityRef = from.parse()?;
        let to_ref: EntityRef = to.parse()?;
        let existing = {
            let state = self.state.read();
            state.namespace(&from_ref.ns).and_then(|ns| {
                ns.edge_position(&from_ref, predicate, &to_ref)
                    .map(|pos| ns.edges[pos].clone())
            })
        };
        let Some(edge) = existing.filter(|e| !e.is_deleted()) else {
            return Ok(false);
        };
        let actor = self.actor(&opts.actor);
        self.delete_edge(&edge, false, &actor, self.clock.now_ns()).await?;
        Ok(true)
    }

    /// Live outbound edges of an entity, optionally restricted to a predicate.
    pub fn relationships(&self, entity: &EntityRef, predicate: Option<&str>) -> Vec<Relationship> {
        let state = self.state.read();
        state
            .namespace(&entity.ns)
            .map(|ns| {
                ns.edges
                    .iter()
                    .filter(|e| {
                        !e.is_deleted()
                            && e.from == *entity
                            && predicate.map_or(true, |p| e.predicate == p)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Full event log of a namespace, in order.
    pub fn events(&self, ns: &str) -> Vec<Event> {
        self.time_travel.events(ns)
    }

    /// Flush buffers and materialize, then drop caches. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // allow the final flush to run
        self.closed.store(false, Ordering::SeqCst);
        let result = self.flush().await;
        self.closed.store(true, Ordering::SeqCst);
        result?;
        self.index_reader.cache().clear();
        self.time_travel.clear();
        Ok(())
    }
}
