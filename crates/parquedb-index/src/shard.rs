//! Compact binary shard format (v3)
//!
//! ```text
//! [version:1][flags:1][entryCount:u32 BE]
//! entry := [rowGroup:u16 BE][rowOffset:varint][docIdLen:u8][docId:bytes]
//! ```

use parquedb_core::error::{Error, Result};

pub const SHARD_VERSION: u8 = 3;

/// One posting: where a document lives inside the Parquet artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRecord {
    pub row_group: u16,
    pub row_offset: u64,
    pub doc_id: String,
}

pub fn encode_shard(records: &[ShardRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(6 + records.len() * 24);
    out.push(SHARD_VERSION);
    out.push(0); // flags
    out.extend_from_slice(&(records.len() as u32).to_be_bytes());
    for record in records {
        if record.doc_id.len() > u8::MAX as usize {
            return Err(Error::InvalidInput(format!(
                "doc id too long for shard entry: {}",
                record.doc_id
            )));
        }
        out.extend_from_slice(&record.row_group.to_be_bytes());
        put_varint(&mut out, record.row_offset);
        out.push(record.doc_id.len() as u8);
        out.extend_from_slice(record.doc_id.as_bytes());
    }
    Ok(out)
}

pub fn decode_shard(bytes: &[u8]) -> Result<Vec<ShardRecord>> {
    if bytes.len() < 6 {
        return Err(Error::Codec("shard too short".into()));
    }
    if bytes[0] != SHARD_VERSION {
        return Err(Error::Codec(format!("unsupported shard version {}", bytes[0])));
    }
    let count = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    let mut pos = 6;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let row_group = u16::from_be_bytes(
            take(bytes, &mut pos, 2)?
                .try_into()
                .expect("two bytes requested"),
        );
        let row_offset = get_varint(bytes, &mut pos)?;
        let id_len = take(bytes, &mut pos, 1)?[0] as usize;
        let doc_id = std::str::from_utf8(take(bytes, &mut pos, id_len)?)
            .map_err(|_| Error::Codec("shard doc id is not utf-8".into()))?
            .to_string();
        records.push(ShardRecord {
            row_group,
            row_offset,
            doc_id,
        });
    }
    if pos != bytes.len() {
        return Err(Error::Codec("trailing bytes after shard entries".into()));
    }
    Ok(records)
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| Error::Codec("shard truncated".into()))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn get_varint(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = take(bytes, pos, 1)?[0];
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::Codec("varint too long".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u64) -> ShardRecord {
        ShardRecord {
            row_group: (n / 100) as u16,
            row_offset: n * 37,
            doc_id: format!("posts/01ARZ3NDEKTSV4RRFFQ69G5F{n:02}"),
        }
    }

    #[test]
    fn roundtrip() {
        let records: Vec<ShardRecord> = (0..300).map(record).collect();
        let bytes = encode_shard(&records).unwrap();
        assert_eq!(bytes[0], SHARD_VERSION);
        assert_eq!(&bytes[2..6], &300u32.to_be_bytes());
        assert_eq!(decode_shard(&bytes).unwrap(), records);
    }

    #[test]
    fn empty_shard() {
        let bytes = encode_shard(&[]).unwrap();
        assert_eq!(bytes.len(), 6);
        assert!(decode_shard(&bytes).unwrap().is_empty());
    }

    #[test]
    fn large_offsets_varint() {
        let records = vec![ShardRecord {
            row_group: u16::MAX,
            row_offset: u64::MAX,
            doc_id: "x".into(),
        }];
        assert_eq!(decode_shard(&encode_shard(&records).unwrap()).unwrap(), records);
    }

    #[test]
    fn rejects_wrong_version_and_truncation() {
        let mut bytes = encode_shard(&[record(1)]).unwrap();
        bytes[0] = 2;
        assert!(decode_shard(&bytes).is_err());
        bytes[0] = SHARD_VERSION;
        assert!(decode_shard(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn rejects_oversized_doc_id() {
        let records = vec![ShardRecord {
            row_group: 0,
            row_offset: 0,
            doc_id: "x".repeat(300),
        }];
        assert!(encode_shard(&records).is_err());
    }
}
