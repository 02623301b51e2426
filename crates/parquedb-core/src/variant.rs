//! Variant codec
//!
//! A self-describing binary encoding for heterogeneous values stored inside
//! Parquet binary columns (`$data`, `before`, `after`, `metadata`). The blob
//! starts with a version byte and a dictionary of object keys; the value tree
//! then references keys by dictionary index, so repeated field names across a
//! document cost one varint each.
//!
//! Layout:
//!
//! ```text
//! [version:u8][dictCount:varint]([keyLen:varint][utf8 bytes])* [value]
//! value := tag:u8 payload
//!   0 null        1 false         2 true
//!   3 int         zigzag varint i64
//!   4 float       f64 little-endian
//!   5 string      varint len + utf8
//!   6 bytes       varint len + raw
//!   7 timestamp   i64 little-endian, epoch nanoseconds
//!   8 bigint      i128 little-endian
//!   9 array       varint count + values
//!  10 object      varint count + (keyIndex:varint value)*
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

const VERSION: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_TIMESTAMP: u8 = 7;
const TAG_BIGINT: u8 = 8;
const TAG_ARRAY: u8 = 9;
const TAG_OBJECT: u8 = 10;

/// A decoded variant value
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Null,
    Bool(bool),
    Int(i64),
    BigInt(i128),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Epoch nanoseconds
    Timestamp(i64),
    Array(Vec<Variant>),
    Object(BTreeMap<String, Variant>),
}

impl Variant {
    /// Whether this value can be encoded. Non-finite floats are the only
    /// rejected scalar; containers are encodable iff all children are.
    pub fn is_encodable(&self) -> bool {
        match self {
            Variant::Float(f) => f.is_finite(),
            Variant::Array(items) => items.iter().all(Variant::is_encodable),
            Variant::Object(fields) => fields.values().all(Variant::is_encodable),
            _ => true,
        }
    }

    /// Encode into a self-contained blob.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if !self.is_encodable() {
            return Err(Error::NotEncodable(
                "non-finite float cannot be encoded".into(),
            ));
        }

        // Dictionary pass: collect all object keys in sorted order so the
        // same logical value always encodes to the same bytes.
        let mut keys = BTreeSet::new();
        collect_keys(self, &mut keys);
        let dict: Vec<&String> = keys.into_iter().collect();
        let index: BTreeMap<&str, u64> = dict
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i as u64))
            .collect();

        let mut out = Vec::with_capacity(64);
        out.push(VERSION);
        put_varint(&mut out, dict.len() as u64);
        for key in &dict {
            put_varint(&mut out, key.len() as u64);
            out.extend_from_slice(key.as_bytes());
        }
        encode_value(self, &index, &mut out);
        Ok(out)
    }

    /// Decode a blob produced by [`Variant::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Variant> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let version = cursor.u8()?;
        if version != VERSION {
            return Err(Error::Codec(format!("unsupported variant version {version}")));
        }
        let dict_len = cursor.varint()? as usize;
        let mut dict = Vec::with_capacity(dict_len);
        for _ in 0..dict_len {
            let len = cursor.varint()? as usize;
            let raw = cursor.take(len)?;
            let key = std::str::from_utf8(raw)
                .map_err(|_| Error::Codec("dictionary key is not utf-8".into()))?;
            dict.push(key.to_string());
        }
        let value = decode_value(&mut cursor, &dict)?;
        if cursor.pos != cursor.bytes.len() {
            return Err(Error::Codec("trailing bytes after variant value".into()));
        }
        Ok(value)
    }

    /// Convert from a JSON value. Integers stay integers; u64 values above
    /// `i64::MAX` become bigints.
    pub fn from_json(value: &serde_json::Value) -> Result<Variant> {
        Ok(match value {
            serde_json::Value::Null => Variant::Null,
            serde_json::Value::Bool(b) => Variant::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Variant::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Variant::BigInt(u as i128)
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    if !f.is_finite() {
                        return Err(Error::NotEncodable(format!("number {n} is not finite")));
                    }
                    Variant::Float(f)
                }
            }
            serde_json::Value::String(s) => Variant::String(s.clone()),
            serde_json::Value::Array(items) => Variant::Array(
                items
                    .iter()
                    .map(Variant::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            serde_json::Value::Object(fields) => {
                let mut map = BTreeMap::new();
                for (k, v) in fields {
                    map.insert(k.clone(), Variant::from_json(v)?);
                }
                Variant::Object(map)
            }
        })
    }

    /// Convert to a JSON value. Bytes render as lowercase hex and bigints as
    /// decimal strings; both are outside JSON's native value space.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Variant::Null => serde_json::Value::Null,
            Variant::Bool(b) => serde_json::Value::Bool(*b),
            Variant::Int(i) => serde_json::Value::from(*i),
            Variant::BigInt(i) => serde_json::Value::String(i.to_string()),
            Variant::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Variant::String(s) => serde_json::Value::String(s.clone()),
            Variant::Bytes(b) => serde_json::Value::String(hex::encode(b)),
            Variant::Timestamp(ts) => serde_json::Value::from(*ts),
            Variant::Array(items) => {
                serde_json::Value::Array(items.iter().map(Variant::to_json).collect())
            }
            Variant::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Encode a JSON document directly into variant bytes.
pub fn encode_json(value: &serde_json::Value) -> Result<Vec<u8>> {
    Variant::from_json(value)?.encode()
}

/// Decode variant bytes into a JSON document.
pub fn decode_json(bytes: &[u8]) -> Result<serde_json::Value> {
    Ok(Variant::decode(bytes)?.to_json())
}

fn collect_keys<'a>(value: &'a Variant, keys: &mut BTreeSet<&'a String>) {
    match value {
        Variant::Array(items) => {
            for item in items {
                collect_keys(item, keys);
            }
        }
        Variant::Object(fields) => {
            for (key, child) in fields {
                keys.insert(key);
                collect_keys(child, keys);
            }
        }
        _ => {}
    }
}

fn encode_value(value: &Variant, index: &BTreeMap<&str, u64>, out: &mut Vec<u8>) {
    match value {
        Variant::Null => out.push(TAG_NULL),
        Variant::Bool(false) => out.push(TAG_FALSE),
        Variant::Bool(true) => out.push(TAG_TRUE),
        Variant::Int(i) => {
            out.push(TAG_INT);
            put_varint(out, zigzag(*i));
        }
        Variant::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Variant::String(s) => {
            out.push(TAG_STRING);
            put_varint(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        Variant::Bytes(b) => {
            out.push(TAG_BYTES);
            put_varint(out, b.len() as u64);
            out.extend_from_slice(b);
        }
        Variant::Timestamp(ts) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&ts.to_le_bytes());
        }
        Variant::BigInt(i) => {
            out.push(TAG_BIGINT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Variant::Array(items) => {
            out.push(TAG_ARRAY);
            put_varint(out, items.len() as u64);
            for item in items {
                encode_value(item, index, out);
            }
        }
        Variant::Object(fields) => {
            out.push(TAG_OBJECT);
            put_varint(out, fields.len() as u64);
            for (key, child) in fields {
                put_varint(out, index[key.as_str()]);
                encode_value(child, index, out);
            }
        }
    }
}

fn decode_value(cursor: &mut Cursor<'_>, dict: &[String]) -> Result<Variant> {
    let tag = cursor.u8()?;
    Ok(match tag {
        TAG_NULL => Variant::Null,
        TAG_FALSE => Variant::Bool(false),
        TAG_TRUE => Variant::Bool(true),
        TAG_INT => Variant::Int(unzigzag(cursor.varint()?)),
        TAG_FLOAT => Variant::Float(f64::from_le_bytes(cursor.array::<8>()?)),
        TAG_STRING => {
            let len = cursor.varint()? as usize;
            let raw = cursor.take(len)?;
            Variant::String(
                std::str::from_utf8(raw)
                    .map_err(|_| Error::Codec("string value is not utf-8".into()))?
                    .to_string(),
            )
        }
        TAG_BYTES => {
            let len = cursor.varint()? as usize;
            Variant::Bytes(cursor.take(len)?.to_vec())
        }
        TAG_TIMESTAMP => Variant::Timestamp(i64::from_le_bytes(cursor.array::<8>()?)),
        TAG_BIGINT => Variant::BigInt(i128::from_le_bytes(cursor.array::<16>()?)),
        TAG_ARRAY => {
            let count = cursor.varint()? as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_value(cursor, dict)?);
            }
            Variant::Array(items)
        }
        TAG_OBJECT => {
            let count = cursor.varint()? as usize;
            let mut fields = BTreeMap::new();
            for _ in 0..count {
                let key_index = cursor.varint()? as usize;
                let key = dict
                    .get(key_index)
                    .ok_or_else(|| Error::Codec(format!("key index {key_index} out of range")))?;
                fields.insert(key.clone(), decode_value(cursor, dict)?);
            }
            Variant::Object(fields)
        }
        other => return Err(Error::Codec(format!("unknown variant tag {other}"))),
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Result<u8> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| Error::Codec("unexpected end of variant blob".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.bytes.len())
            .ok_or_else(|| Error::Codec("unexpected end of variant blob".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
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

fn zigzag(value: i64) -> u64 {
    (value.wrapping_shl(1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
