//! Index catalog
//!
//! A single JSON manifest at `indexes/_catalog.json`. Unknown catalog
//! versions degrade to an empty catalog so an old reader never misuses
//! indexes it does not understand.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use parquedb_core::error::{Error, Result};
use parquedb_storage::ObjectStore;

pub const CATALOG_PATH: &str = "indexes/_catalog.json";
pub const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    #[serde(rename = "hash")]
    Hash,
    #[serde(rename = "sst")]
    Sst,
    #[serde(rename = "fts")]
    Fts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IndexKind,
    pub field: String,
    pub path: String,
    pub size_bytes: u64,
    pub entry_count: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sharded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IndexCatalog {
    pub version: u32,
    pub indexes: Vec<IndexEntry>,
}

impl IndexCatalog {
    pub fn new(indexes: Vec<IndexEntry>) -> Self {
        Self {
            version: CATALOG_VERSION,
            indexes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// First index of a kind covering `field`.
    pub fn find(&self, kind: IndexKind, field: &str) -> Option<&IndexEntry> {
        self.indexes
            .iter()
            .find(|e| e.kind == kind && e.field == field)
    }

    /// Any FTS index, preferring one on the given field.
    pub fn find_fts(&self, field: Option<&str>) -> Option<&IndexEntry> {
        if let Some(field) = field {
            if let Some(entry) = self.find(IndexKind::Fts, field) {
                return Some(entry);
            }
        }
        self.indexes.iter().find(|e| e.kind == IndexKind::Fts)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Codec(format!("catalog: {e}")))
    }

    /// Parse catalog bytes; unknown versions yield the empty catalog.
    pub fn from_bytes(bytes: &[u8]) -> IndexCatalog {
        match serde_json::from_slice::<IndexCatalog>(bytes) {
            Ok(catalog) if catalog.version == CATALOG_VERSION => catalog,
            Ok(catalog) => {
                warn!(version = catalog.version, "unknown catalog version, ignoring indexes");
                IndexCatalog::default()
            }
            Err(e) => {
                warn!(error = %e, "unreadable index catalog, ignoring indexes");
                IndexCatalog::default()
            }
        }
    }

    /// Load from storage; a missing catalog is simply empty.
    pub async fn load(store: &Arc<dyn ObjectStore>) -> Result<IndexCatalog> {
        match store.read(CATALOG_PATH).await {
            Ok(bytes) => Ok(Self::from_bytes(&bytes)),
            Err(Error::NotFound(_)) => Ok(IndexCatalog::default()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: IndexKind, field: &str) -> IndexEntry {
        IndexEntry {
            name: name.into(),
            kind,
            field: field.into(),
            path: format!("indexes/secondary/{name}"),
            size_bytes: 100,
            entry_count: 10,
            sharded: kind != IndexKind::Fts,
            manifest_path: Some(format!("indexes/secondary/{name}/_manifest.json")),
        }
    }

    #[test]
    fn json_shape() {
        let catalog = IndexCatalog::new(vec![entry("by-status", IndexKind::Hash, "status")]);
        let text = String::from_utf8(catalog.to_bytes().unwrap()).unwrap();
        assert!(text.contains("\"type\": \"hash\""));
        assert!(text.contains("\"sizeBytes\""));
        assert!(text.contains("\"entryCount\""));
        assert!(text.contains("\"manifestPath\""));
        let parsed = IndexCatalog::from_bytes(text.as_bytes());
        assert_eq!(parsed, catalog);
    }

    #[test]
    fn unknown_version_degrades_to_empty() {
        let bytes = br#"{"version": 99, "indexes": [{"name": "x", "type": "hash", "field": "f", "path": "p", "sizeBytes": 1, "entryCount": 1}]}"#;
        assert!(IndexCatalog::from_bytes(bytes).is_empty());
    }

    #[test]
    fn garbage_degrades_to_empty() {
        assert!(IndexCatalog::from_bytes(b"not json at all").is_empty());
    }

    #[test]
    fn lookup_by_kind_and_field() {
        let catalog = IndexCatalog::new(vec![
            entry("by-status", IndexKind::Hash, "status"),
            entry("by-views", IndexKind::Sst, "views"),
            entry("title-fts", IndexKind::Fts, "title"),
        ]);
        assert!(catalog.find(IndexKind::Hash, "status").is_some());
        assert!(catalog.find(IndexKind::Hash, "views").is_none());
        assert_eq!(catalog.find_fts(Some("title")).unwrap().name, "title-fts");
        assert_eq!(catalog.find_fts(Some("body")).unwrap().name, "title-fts");
        assert_eq!(catalog.find_fts(None).unwrap().name, "title-fts");
    }
}
