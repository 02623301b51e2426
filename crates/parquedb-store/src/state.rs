//! In-memory working set
//!
//! One table of entities and one of edges per namespace. The store is
//! single-writer per namespace; readers take the RwLock shared.

use std::collections::{BTreeMap, HashMap};

use parquedb_core::types::{Entity, EntityRef, Relationship};
use parquedb_core::ulid::Ulid;

#[derive(Debug, Default)]
pub struct Namespace {
    pub entities: BTreeMap<Ulid, Entity>,
    pub edges: Vec<Relationship>,
}

impl Namespace {
    /// Position of an edge by its identity key, live or soft-deleted.
    pub fn edge_position(&self, from: &EntityRef, predicate: &str, to: &EntityRef) -> Option<usize> {
        self.edges
            .iter()
            .position(|e| e.from == *from && e.predicate == predicate && e.to == *to)
    }
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub namespaces: HashMap<String, Namespace>,
}

impl StoreState {
    pub fn namespace_mut(&mut self, ns: &str) -> &mut Namespace {
        self.namespaces.entry(ns.to_string()).or_default()
    }

    pub fn namespace(&self, ns: &str) -> Option<&Namespace> {
        self.namespaces.get(ns)
    }

    pub fn entity(&self, ns: &str, id: Ulid) -> Option<&Entity> {
        self.namespaces.get(ns)?.entities.get(&id)
    }

    /// All entities across namespaces (materialization order: ns, then id).
    pub fn all_entities(&self) -> Vec<&Entity> {
        let mut namespaces: Vec<&String> = self.namespaces.keys().collect();
        namespaces.sort();
        namespaces
            .into_iter()
            .flat_map(|ns| self.namespaces[ns].entities.values())
            .collect()
    }

    /// All live edges across namespaces.
    pub fn live_edges(&self) -> Vec<&Relationship> {
        let mut namespaces: Vec<&String> = self.namespaces.keys().collect();
        namespaces.sort();
        namespaces
            .into_iter()
            .flat_map(|ns| self.namespaces[ns].edges.iter())
            .filter(|e| !e.is_deleted())
            .collect()
    }

    /// Edges incident to an entity (either direction), live or deleted.
    pub fn incident_edges_mut(&mut self, entity: &EntityRef) -> Vec<&mut Relationship> {
        self.namespaces
            .values_mut()
            .flat_map(|ns| ns.edges.iter_mut())
            .filter(|e| e.from == *entity || e.to == *entity)
            .collect()
    }
}
