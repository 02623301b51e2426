//! CDC record shape
//!
//! JSON field names carry the underscore prefix of the wire contract
//! (`_id`, `_seq`, `_op`, ...); timestamps are epoch nanoseconds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation codes: create, update, delete, snapshot read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CdcOp {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    #[serde(rename = "r")]
    Read,
}

impl CdcOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CdcOp::Create => "c",
            CdcOp::Update => "u",
            CdcOp::Delete => "d",
            CdcOp::Read => "r",
        }
    }
}

/// Where a stream of records comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcSource {
    pub system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl CdcSource {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            database: None,
            collection: None,
        }
    }

    pub fn with_collection(
        system: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            database: Some(database.into()),
            collection: Some(collection.into()),
        }
    }
}

/// One change record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdcRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_seq")]
    pub seq: u64,
    #[serde(rename = "_op")]
    pub op: CdcOp,
    #[serde(rename = "_before")]
    pub before: Option<Value>,
    #[serde(rename = "_after")]
    pub after: Option<Value>,
    /// Epoch nanoseconds
    #[serde(rename = "_ts")]
    pub ts: i64,
    #[serde(rename = "_source")]
    pub source: CdcSource,
    #[serde(rename = "_txn", default, skip_serializing_if = "Option::is_none")]
    pub txn: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_field_names() {
        let record = CdcRecord {
            id: "posts/1".into(),
            seq: 3,
            op: CdcOp::Update,
            before: Some(json!({"name": "A"})),
            after: Some(json!({"name": "B"})),
            ts: 1_700_000_000_000_000_000,
            source: CdcSource::with_collection("parquedb", "main", "posts"),
            txn: None,
        };
        let text = serde_json::to_string(&record).unwrap();
        for field in ["\"_id\"", "\"_seq\"", "\"_op\":\"u\"", "\"_before\"", "\"_after\"", "\"_ts\"", "\"_source\""] {
            assert!(text.contains(field), "missing {field} in {text}");
        }
        assert!(!text.contains("_txn"));
        let parsed: CdcRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn op_codes() {
        assert_eq!(serde_json::to_string(&CdcOp::Create).unwrap(), "\"c\"");
        assert_eq!(serde_json::to_string(&CdcOp::Read).unwrap(), "\"r\"");
        assert_eq!(serde_json::from_str::<CdcOp>("\"d\"").unwrap(), CdcOp::Delete);
    }
}
