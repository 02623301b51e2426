//! Entity and relationship types
//!
//! Entities are globally addressed as `ns/id`. Relationships are directed
//! edges `(fromNs/fromId) --predicate--> (toNs/toId)` with a reverse label.
//! Both carry optimistic version counters and audit fields; event images are
//! complete JSON documents including the audit fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::ulid::Ulid;

/// A `ns/id` address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub ns: String,
    pub id: Ulid,
}

impl EntityRef {
    pub fn new(ns: impl Into<String>, id: Ulid) -> Self {
        Self { ns: ns.into(), id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ns, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ns, id) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidInput(format!("entity ref must be ns/id: {s}")))?;
        if ns.is_empty() {
            return Err(Error::InvalidInput(format!("empty namespace in ref: {s}")));
        }
        Ok(Self {
            ns: ns.to_string(),
            id: id.parse()?,
        })
    }
}

impl Serialize for EntityRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// A stored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub ns: String,
    pub id: Ulid,
    /// The `$type` attribute
    pub entity_type: String,
    /// The `$name` display attribute; preserved verbatim, never trimmed
    pub name: String,
    /// Monotone version, starts at 1 and increments by exactly 1 per mutation
    pub version: u64,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    /// User fields
    pub data: Map<String, Value>,
}

impl Entity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.ns.clone(), self.id)
    }

    /// `ns/id` address string.
    pub fn path(&self) -> String {
        format!("{}/{}", self.ns, self.id)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The complete document: user fields plus `$`-prefixed system fields and
    /// camelCase audit fields. This is what event images and the `$data`
    /// Parquet column carry.
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("$id".into(), Value::String(self.path()));
        doc.insert("$type".into(), Value::String(self.entity_type.clone()));
        doc.insert("name".into(), Value::String(self.name.clone()));
        doc.insert("version".into(), Value::from(self.version));
        doc.insert("createdAt".into(), Value::from(self.created_at));
        doc.insert("createdBy".into(), Value::String(self.created_by.clone()));
        doc.insert("updatedAt".into(), Value::from(self.updated_at));
        doc.insert("updatedBy".into(), Value::String(self.updated_by.clone()));
        if let Some(at) = self.deleted_at {
            doc.insert("deletedAt".into(), Value::from(at));
        }
        if let Some(by) = &self.deleted_by {
            doc.insert("deletedBy".into(), Value::String(by.clone()));
        }
        for (k, v) in &self.data {
            doc.insert(k.clone(), v.clone());
        }
        Value::Object(doc)
    }

    /// Rebuild an entity from a document produced by [`Entity::to_document`].
    pub fn from_document(doc: &Value) -> Result<Entity> {
        let obj = doc
            .as_object()
            .ok_or_else(|| Error::InvalidInput("entity document must be an object".into()))?;
        let get_str = |key: &str| -> Result<String> {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidInput(format!("document missing {key}")))
        };
        let get_i64 = |key: &str| -> Result<i64> {
            obj.get(key)
                .and_then(Value::as_i64)
                .ok_or_else(|| Error::InvalidInput(format!("document missing {key}")))
        };
        let entity_ref: EntityRef = get_str("$id")?.parse()?;
        let mut data = Map::new();
        for (k, v) in obj {
            match k.as_str() {
                "$id" | "$type" | "name" | "version" | "createdAt" | "createdBy" | "updatedAt"
                | "updatedBy" | "deletedAt" | "deletedBy" => {}
                _ => {
                    data.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(Entity {
            ns: entity_ref.ns,
            id: entity_ref.id,
            entity_type: get_str("$type")?,
            name: get_str("name")?,
            version: get_i64("version")? as u64,
            created_at: get_i64("createdAt")?,
            created_by: get_str("createdBy")?,
            updated_at: get_i64("updatedAt")?,
            updated_by: get_str("updatedBy")?,
            deleted_at: obj.get("deletedAt").and_then(Value::as_i64),
            deleted_by: obj
                .get("deletedBy")
                .and_then(Value::as_str)
                .map(str::to_string),
            data,
        })
    }
}

/// A directed edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: EntityRef,
    pub predicate: String,
    /// Reverse traversal label, `predicate + "s"` unless overridden
    pub reverse: String,
    pub to: EntityRef,
    pub version: u64,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    /// Optional edge payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Relationship {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Identity of the edge: at most one live edge exists per key.
    pub fn key(&self) -> (EntityRef, String, EntityRef) {
        (self.from.clone(), self.predicate.clone(), self.to.clone())
    }

    /// The triple string used as an event target.
    pub fn triple(&self) -> String {
        format!("{}:{}:{}", self.from, self.predicate, self.to)
    }

    /// Document form carried in relationship event images.
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("from".into(), Value::String(self.from.to_string()));
        doc.insert("predicate".into(), Value::String(self.predicate.clone()));
        doc.insert("reverse".into(), Value::String(self.reverse.clone()));
        doc.insert("to".into(), Value::String(self.to.to_string()));
        doc.insert("version".into(), Value::from(self.version));
        doc.insert("createdAt".into(), Value::from(self.created_at));
        doc.insert("createdBy".into(), Value::String(self.created_by.clone()));
        doc.insert("updatedAt".into(), Value::from(self.updated_at));
        doc.insert("updatedBy".into(), Value::String(self.updated_by.clone()));
        if let Some(at) = self.deleted_at {
            doc.insert("deletedAt".into(), Value::from(at));
        }
        if let Some(by) = &self.deleted_by {
            doc.insert("deletedBy".into(), Value::String(by.clone()));
        }
        if let Some(data) = &self.data {
            doc.insert("data".into(), Value::Object(data.clone()));
        }
        Value::Object(doc)
    }

    /// Rebuild an edge from a document produced by [`Relationship::to_document`].
    pub fn from_document(doc: &Value) -> Result<Relationship> {
        let obj = doc
            .as_object()
            .ok_or_else(|| Error::InvalidInput("relationship document must be an object".into()))?;
        let get_str = |key: &str| -> Result<String> {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidInput(format!("relationship document missing {key}")))
        };
        let get_i64 = |key: &str| -> Result<i64> {
            obj.get(key)
                .and_then(Value::as_i64)
                .ok_or_else(|| Error::InvalidInput(format!("relationship document missing {key}")))
        };
        Ok(Relationship {
            from: get_str("from")?.parse()?,
            predicate: get_str("predicate")?,
            reverse: get_str("reverse")?,
            to: get_str("to")?.parse()?,
            version: obj.get("version").and_then(Value::as_u64).unwrap_or(1),
            created_at: get_i64("createdAt")?,
            created_by: get_str("createdBy")?,
            updated_at: get_i64("updatedAt")?,
            updated_by: get_str("updatedBy")?,
            deleted_at: obj.get("deletedAt").and_then(Value::as_i64),
            deleted_by: obj
                .get("deletedBy")
                .and_then(Value::as_str)
                .map(str::to_string),
            data: obj
                .get("data")
                .and_then(Value::as_object)
                .cloned(),
        })
    }
}

/// Default reverse label: `predicate + "s"` unless the predicate is already
/// plural.
pub fn default_reverse(predicate: &str) -> String {
    if predicate.ends_with('s') {
        predicate.to_string()
    } else {
        format!("{predicate}s")
    }
}
