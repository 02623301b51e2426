//! Time-travel engine
//!
//! Events live in one contiguous arena per namespace; a per-entity index of
//! arena offsets is built lazily on the first time-travel query and kept up
//! to date afterwards. Lookup binary-searches the offsets for the greatest
//! `ts <= as_of`, replays up to that point (consulting a reconstruction
//! cache first) and caches the result. Mutating an entity invalidates its
//! cache entries.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use parquedb_core::error::Result;
use parquedb_core::event::{Event, EventOp, EventTarget};
use parquedb_core::types::Entity;

#[derive(Debug, Default)]
struct Arena {
    /// Events in append order; `ts` is non-decreasing
    events: Vec<Event>,
    /// entity path -> offsets into `events`, built on first query
    by_entity: Option<HashMap<String, Vec<u32>>>,
}

impl Arena {
    fn build_index(&mut self) {
        if self.by_entity.is_some() {
            return;
        }
        let mut index: HashMap<String, Vec<u32>> = HashMap::new();
        for (offset, event) in self.events.iter().enumerate() {
            if let EventTarget::Entity(entity) = &event.target {
                index.entry(entity.to_string()).or_default().push(offset as u32);
            }
        }
        self.by_entity = Some(index);
    }
}

#[derive(Debug, Default)]
pub struct TimeTravel {
    arenas: RwLock<HashMap<String, Arena>>,
    /// (entity path, as_of) -> reconstructed state
    cache: Mutex<HashMap<(String, i64), Option<Entity>>>,
}

impl TimeTravel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load the event log of a namespace (open-time hydration).
    pub fn hydrate(&self, ns: &str, events: Vec<Event>) {
        let mut arenas = self.arenas.write();
        let arena = arenas.entry(ns.to_string()).or_default();
        arena.events.extend(events);
        arena.by_entity = None; // rebuilt lazily
    }

    /// Append one event as it is produced.
    pub fn append(&self, ns: &str, event: Event) {
        let mut arenas = self.arenas.write();
        let arena = arenas.entry(ns.to_string()).or_default();
        if let (Some(index), EventTarget::Entity(entity)) = (&mut arena.by_entity, &event.target) {
            index
                .entry(entity.to_string())
                .or_default()
                .push(arena.events.len() as u32);
        }
        arena.events.push(event);
        drop(arenas);
        // any mutation invalidates cached reconstructions of that entity
        self.invalidate_prefix_of_last_target(ns);
    }

    fn invalidate_prefix_of_last_target(&self, ns: &str) {
        let arenas = self.arenas.read();
        let Some(arena) = arenas.get(ns) else { return };
        let Some(event) = arena.events.last() else { return };
        if let EventTarget::Entity(entity) = &event.target {
            let path = entity.to_string();
            self.cache.lock().retain(|(p, _), _| *p != path);
        }
    }

    pub fn invalidate(&self, entity_path: &str) {
        self.cache.lock().retain(|(p, _), _| p != entity_path);
    }

    /// Reconstruct the state of one entity as of a timestamp (inclusive).
    pub fn get(&self, ns: &str, entity_path: &str, as_of: i64) -> Result<Option<Entity>> {
        let cache_key = (entity_path.to_string(), as_of);
        if let Some(cached) = self.cache.lock().get(&cache_key) {
            return Ok(cached.clone());
        }

        let snapshot = {
            let mut arenas = self.arenas.write();
            let Some(arena) = arenas.get_mut(ns) else {
                return Ok(None);
            };
            arena.build_index();
            let index = arena.by_entity.as_ref().expect("index just built");
            let Some(offsets) = index.get(entity_path) else {
                return Ok(None);
            };

            // greatest offset with ts <= as_of
            let upto = offsets.partition_point(|&off| arena.events[off as usize].ts <= as_of);
            if upto == 0 {
                None
            } else {
                let mut snapshot: Option<Entity> = None;
                for &offset in &offsets[..upto] {
                    let event = &arena.events[offset as usize];
                    snapshot = match event.op {
                        EventOp::Create | EventOp::Update => match &event.after {
                            Some(doc) => Some(Entity::from_document(doc)?),
                            None => None,
                        },
                        EventOp::Delete => None,
                    };
                }
                snapshot
            }
        };

        self.cache.lock().insert(cache_key, snapshot.clone());
        Ok(snapshot)
    }

    /// Every entity path ever seen in a namespace's event log.
    pub fn entity_paths(&self, ns: &str) -> Vec<String> {
        let mut arenas = self.arenas.write();
        let Some(arena) = arenas.get_mut(ns) else {
            return Vec::new();
        };
        arena.build_index();
        let mut paths: Vec<String> = arena
            .by_entity
            .as_ref()
            .expect("index just built")
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Namespaces with at least one event.
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.arenas.read().keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// All events of a namespace in arena order.
    pub fn events(&self, ns: &str) -> Vec<Event> {
        self.arenas
            .read()
            .get(ns)
            .map(|arena| arena.events.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.arenas.write().clear();
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_core::types::EntityRef;
    use parquedb_core::ulid::Ulid;
    use serde_json::json;

    fn entity_id() -> Ulid {
        Ulid::from_parts(1, 1)
    }

    fn doc(title: &str, version: u64) -> serde_json::Value {
        json!({
            "$id": format!("posts/{}", entity_id()),
            "$type": "Post",
            "name": "Hello",
            "version": version,
            "createdAt": 100,
            "createdBy": "amy",
            "updatedAt": 100 + version,
            "updatedBy": "amy",
            "title": title
        })
    }

    fn event(ts: i64, op: EventOp, after: Option<serde_json::Value>) -> Event {
        Event {
            id: Ulid::from_parts(ts as u64, 1),
            ts,
            op,
            target: EventTarget::Entity(EntityRef::new("posts", entity_id())),
            before: None,
            after,
            actor: "amy".into(),
            metadata: None,
        }
    }

    fn path() -> String {
        format!("posts/{}", entity_id())
    }

    fn engine() -> TimeTravel {
        let tt = TimeTravel::new();
        tt.hydrate(
            "posts",
            vec![
                event(100, EventOp::Create, Some(doc("A", 1))),
                event(200, EventOp::Update, Some(doc("B", 2))),
                event(300, EventOp::Update, Some(doc("C", 3))),
            ],
        );
        tt
    }

    #[test]
    fn snapshots_at_each_point() {
        let tt = engine();
        let at = |ts| tt.get("posts", &path(), ts).unwrap();
        assert_eq!(at(100).unwrap().data["title"], "A");
        assert_eq!(at(150).unwrap().data["title"], "A");
        assert_eq!(at(200).unwrap().data["title"], "B");
        assert_eq!(at(299).unwrap().data["title"], "B");
        assert_eq!(at(300).unwrap().data["title"], "C");
        assert_eq!(at(i64::MAX).unwrap().data["title"], "C");
        // one nanosecond before creation: nothing
        assert!(at(99).is_none());
    }

    #[test]
    fn delete_yields_null_state() {
        let tt = engine();
        tt.append("posts", event(400, EventOp::Delete, None));
        assert!(tt.get("posts", &path(), 400).unwrap().is_none());
        // earlier snapshots survive
        assert_eq!(tt.get("posts", &path(), 250).unwrap().unwrap().data["title"], "B");
    }

    #[test]
    fn append_invalidates_cache() {
        let tt = engine();
        // warm the cache at a future timestamp
        assert_eq!(tt.get("posts", &path(), 1_000).unwrap().unwrap().data["title"], "C");
        tt.append("posts", event(500, EventOp::Update, Some(doc("D", 4))));
        assert_eq!(tt.get("posts", &path(), 1_000).unwrap().unwrap().data["title"], "D");
    }

    #[test]
    fn unknown_entity_and_namespace() {
        let tt = engine();
        assert!(tt.get("posts", "posts/01ARZ3NDEKTSV4RRFFQ69G5FAV", 500).unwrap().is_none());
        assert!(tt.get("users", &path(), 500).unwrap().is_none());
    }

    #[test]
    fn entity_paths_listing() {
        let tt = engine();
        assert_eq!(tt.entity_paths("posts"), vec![path()]);
        assert!(tt.entity_paths("users").is_empty());
    }

    #[test]
    fn relationship_events_do_not_shadow_entities() {
        let tt = engine();
        tt.append(
            "posts",
            Event {
                id: Ulid::from_parts(350, 1),
                ts: 350,
                op: EventOp::Create,
                target: EventTarget::Relationship {
                    from: EntityRef::new("posts", entity_id()),
                    predicate: "author".into(),
                    to: EntityRef::new("users", Ulid::from_parts(1, 2)),
                },
                before: None,
                after: Some(json!({"predicate": "author"})),
                actor: "amy".into(),
                metadata: None,
            },
        );
        // the edge event does not alter the entity snapshot
        assert_eq!(tt.get("posts", &path(), 400).unwrap().unwrap().data["title"], "C");
    }
}
