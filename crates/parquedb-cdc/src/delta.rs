//! Delta Lake interop
//!
//! CDC operation codes map onto Delta change types: `c` and `r` become
//! `insert`, `d` becomes `delete`, and `u` splits into an
//! `update_preimage` / `update_postimage` pair. The inverse collapses a
//! pair back into a single `u`, combining a preimage with the postimage
//! that follows it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{CdcOp, CdcRecord, CdcSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaChangeType {
    Insert,
    Delete,
    UpdatePreimage,
    UpdatePostimage,
}

/// One row of a Delta change-data feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRecord {
    #[serde(rename = "_change_type")]
    pub change_type: DeltaChangeType,
    /// Row data: the post-state for inserts/postimages, the pre-state for
    /// deletes/preimages
    pub data: Option<Value>,
    #[serde(rename = "_commit_version")]
    pub commit_version: u64,
    #[serde(rename = "_commit_timestamp")]
    pub commit_timestamp: i64,
    pub id: String,
}

/// Map one CDC record onto its Delta rows.
pub fn cdc_to_delta(record: &CdcRecord) -> Vec<DeltaRecord> {
    let row = |change_type, data: &Option<Value>| DeltaRecord {
        change_type,
        data: data.clone(),
        commit_version: record.seq,
        commit_timestamp: record.ts,
        id: record.id.clone(),
    };
    match record.op {
        CdcOp::Create | CdcOp::Read => vec![row(DeltaChangeType::Insert, &record.after)],
        CdcOp::Delete => vec![row(DeltaChangeType::Delete, &record.before)],
        CdcOp::Update => vec![
            row(DeltaChangeType::UpdatePreimage, &record.before),
            row(DeltaChangeType::UpdatePostimage, &record.after),
        ],
    }
}

/// Map Delta rows back to CDC records, collapsing preimage/postimage pairs
/// (matched by id and commit version) into single updates. A postimage
/// without a preceding preimage still yields an update with `before = None`.
pub fn delta_to_cdc(records: &[DeltaRecord], source: &CdcSource) -> Vec<CdcRecord> {
    let mut out = Vec::with_capacity(records.len());
    let mut pending_preimage: Option<&DeltaRecord> = None;

    for record in records {
        match record.change_type {
            DeltaChangeType::Insert => out.push(CdcRecord {
                id: record.id.clone(),
                seq: record.commit_version,
                op: CdcOp::Create,
                before: None,
                after: record.data.clone(),
                ts: record.commit_timestamp,
                source: source.clone(),
                txn: None,
            }),
            DeltaChangeType::Delete => out.push(CdcRecord {
                id: record.id.clone(),
                seq: record.commit_version,
                op: CdcOp::Delete,
                before: record.data.clone(),
                after: None,
                ts: record.commit_timestamp,
                source: source.clone(),
                txn: None,
            }),
            DeltaChangeType::UpdatePreimage => {
                pending_preimage = Some(record);
            }
            DeltaChangeType::UpdatePostimage => {
                let before = pending_preimage
                    .take()
                    .filter(|pre| pre.id == record.id && pre.commit_version == record.commit_version)
                    .and_then(|pre| pre.data.clone());
                out.push(CdcRecord {
                    id: record.id.clone(),
                    seq: record.commit_version,
                    op: CdcOp::Update,
                    before,
                    after: record.data.clone(),
                    ts: record.commit_timestamp,
                    source: source.clone(),
                    txn: None,
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> CdcSource {
        CdcSource::with_collection("parquedb", "main", "posts")
    }

    fn cdc(op: CdcOp, before: Option<Value>, after: Option<Value>) -> CdcRecord {
        CdcRecord {
            id: "posts/1".into(),
            seq: 7,
            op,
            before,
            after,
            ts: 1_000,
            source: source(),
            txn: None,
        }
    }

    #[test]
    fn update_splits_into_pair() {
        let record = cdc(
            CdcOp::Update,
            Some(json!({"name": "A"})),
            Some(json!({"name": "B"})),
        );
        let delta = cdc_to_delta(&record);
        assert_eq!(delta.len(), 2);
        assert_eq!(delta[0].change_type, DeltaChangeType::UpdatePreimage);
        assert_eq!(delta[0].data, Some(json!({"name": "A"})));
        assert_eq!(delta[1].change_type, DeltaChangeType::UpdatePostimage);
        assert_eq!(delta[1].data, Some(json!({"name": "B"})));
    }

    #[test]
    fn create_read_delete_map_to_single_rows() {
        let create = cdc_to_delta(&cdc(CdcOp::Create, None, Some(json!({"n": 1}))));
        assert_eq!(create.len(), 1);
        assert_eq!(create[0].change_type, DeltaChangeType::Insert);

        let read = cdc_to_delta(&cdc(CdcOp::Read, None, Some(json!({"n": 1}))));
        assert_eq!(read[0].change_type, DeltaChangeType::Insert);

        let delete = cdc_to_delta(&cdc(CdcOp::Delete, Some(json!({"n": 1})), None));
        assert_eq!(delete.len(), 1);
        assert_eq!(delete[0].change_type, DeltaChangeType::Delete);
        assert_eq!(delete[0].data, Some(json!({"n": 1})));
    }

    #[test]
    fn roundtrip_collapses_update_pair() {
        let original = cdc(
            CdcOp::Update,
            Some(json!({"name": "A"})),
            Some(json!({"name": "B"})),
        );
        let back = delta_to_cdc(&cdc_to_delta(&original), &source());
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].op, CdcOp::Update);
        assert_eq!(back[0].before, original.before);
        assert_eq!(back[0].after, original.after);
        assert_eq!(back[0].seq, original.seq);
    }

    #[test]
    fn lone_postimage_still_updates() {
        let rows = vec![DeltaRecord {
            change_type: DeltaChangeType::UpdatePostimage,
            data: Some(json!({"name": "B"})),
            commit_version: 3,
            commit_timestamp: 500,
            id: "posts/9".into(),
        }];
        let back = delta_to_cdc(&rows, &source());
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].op, CdcOp::Update);
        assert!(back[0].before.is_none());
    }

    #[test]
    fn mismatched_preimage_is_not_combined() {
        let rows = vec![
            DeltaRecord {
                change_type: DeltaChangeType::UpdatePreimage,
                data: Some(json!({"name": "A"})),
                commit_version: 3,
                commit_timestamp: 500,
                id: "posts/other".into(),
            },
            DeltaRecord {
                change_type: DeltaChangeType::UpdatePostimage,
                data: Some(json!({"name": "B"})),
                commit_version: 3,
                commit_timestamp: 500,
                id: "posts/9".into(),
            },
        ];
        let back = delta_to_cdc(&rows, &source());
        assert_eq!(back.len(), 1);
        assert!(back[0].before.is_none());
    }

    #[test]
    fn change_type_wire_names() {
        let text = serde_json::to_string(&DeltaChangeType::UpdatePreimage).unwrap();
        assert_eq!(text, "\"update_preimage\"");
        assert_eq!(
            serde_json::from_str::<DeltaChangeType>("\"insert\"").unwrap(),
            DeltaChangeType::Insert
        );
    }
}
