//! Per-index shard manifest
//!
//! Hash shards are keyed by value; SST shards carry a `[minValue, maxValue]`
//! range. Both live in the same manifest shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parquedb_core::error::{Error, Result};
use parquedb_core::query::compare_values;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardInfo {
    pub name: String,
    pub path: String,
    /// Exact value for hash shards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Range bounds for SST shards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Value>,
    pub entry_count: u64,
}

impl ShardInfo {
    /// Whether an SST shard's `[min, max]` overlaps the query bounds.
    /// Bounds are `(value, inclusive)`.
    pub fn overlaps_range(
        &self,
        lower: Option<&(Value, bool)>,
        upper: Option<&(Value, bool)>,
    ) -> bool {
        use std::cmp::Ordering::*;
        if let (Some(max), Some((low, inclusive))) = (&self.max_value, lower) {
            match compare_values(max, low) {
                Some(Less) => return false,
                Some(Equal) if !inclusive => return false,
                _ => {}
            }
        }
        if let (Some(min), Some((high, inclusive))) = (&self.min_value, upper) {
            match compare_values(min, high) {
                Some(Greater) => return false,
                Some(Equal) if !inclusive => return false,
                _ => {}
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardManifest {
    pub index: String,
    pub field: String,
    pub shards: Vec<ShardInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_path: Option<String>,
}

impl ShardManifest {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Codec(format!("manifest: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ShardManifest> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("manifest: {e}")))
    }

    /// Hash shard holding exactly this value.
    pub fn shard_for_value(&self, value: &Value) -> Option<&ShardInfo> {
        self.shards.iter().find(|s| s.value.as_ref() == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range_shard(min: i64, max: i64) -> ShardInfo {
        ShardInfo {
            name: format!("{min}-{max}"),
            path: format!("indexes/secondary/views/{min}-{max}.bin"),
            value: None,
            min_value: Some(json!(min)),
            max_value: Some(json!(max)),
            entry_count: 10,
        }
    }

    #[test]
    fn roundtrip() {
        let manifest = ShardManifest {
            index: "by-views".into(),
            field: "views".into(),
            shards: vec![range_shard(0, 9), range_shard(10, 19)],
            bloom_path: Some("indexes/secondary/by-views/_bloom.bin".into()),
        };
        let parsed = ShardManifest::from_bytes(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn range_overlap() {
        let shard = range_shard(10, 19);
        let bound = |v: i64, inclusive: bool| (json!(v), inclusive);

        // query: views > 19 — only overlaps if exclusive bound misses max
        assert!(shard.overlaps_range(Some(&bound(19, true)), None));
        assert!(!shard.overlaps_range(Some(&bound(19, false)), None));
        assert!(!shard.overlaps_range(Some(&bound(20, true)), None));

        // query: views < 10
        assert!(shard.overlaps_range(None, Some(&bound(10, true))));
        assert!(!shard.overlaps_range(None, Some(&bound(10, false))));
        assert!(!shard.overlaps_range(None, Some(&bound(9, true))));

        // interior range
        assert!(shard.overlaps_range(Some(&bound(12, true)), Some(&bound(15, true))));
        // unbounded
        assert!(shard.overlaps_range(None, None));
    }

    #[test]
    fn value_lookup() {
        let manifest = ShardManifest {
            index: "by-status".into(),
            field: "status".into(),
            shards: vec![ShardInfo {
                name: "published".into(),
                path: "indexes/secondary/by-status/published.bin".into(),
                value: Some(json!("published")),
                min_value: None,
                max_value: None,
                entry_count: 3,
            }],
            bloom_path: None,
        };
        assert!(manifest.shard_for_value(&json!("published")).is_some());
        assert!(manifest.shard_for_value(&json!("draft")).is_none());
    }
}
