//! Immutable event records
//!
//! Every mutation appends one event. Events are globally orderable by their
//! ULID; per-entity events form a total order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::EntityRef;
use crate::ulid::Ulid;

/// The mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventOp {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

impl EventOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOp::Create => "CREATE",
            EventOp::Update => "UPDATE",
            EventOp::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(EventOp::Create),
            "UPDATE" => Ok(EventOp::Update),
            "DELETE" => Ok(EventOp::Delete),
            _ => Err(Error::InvalidInput(format!("unknown event op: {s}"))),
        }
    }
}

/// What an event mutated: an entity (`ns:id`) or a relationship triple
/// (`fromNs/fromId:predicate:toNs/toId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Entity(EntityRef),
    Relationship {
        from: EntityRef,
        predicate: String,
        to: EntityRef,
    },
}

impl EventTarget {
    pub fn entity(ns: impl Into<String>, id: Ulid) -> Self {
        EventTarget::Entity(EntityRef::new(ns, id))
    }

    /// The entity whose history this event belongs to. For relationship
    /// events that is the edge source.
    pub fn primary(&self) -> &EntityRef {
        match self {
            EventTarget::Entity(entity) => entity,
            EventTarget::Relationship { from, .. } => from,
        }
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self, EventTarget::Relationship { .. })
    }
}

impl fmt::Display for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTarget::Entity(entity) => write!(f, "{}:{}", entity.ns, entity.id),
            EventTarget::Relationship {
                from,
                predicate,
                to,
            } => write!(f, "{from}:{predicate}:{to}"),
        }
    }
}

impl FromStr for EventTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [ns, id] => Ok(EventTarget::Entity(EntityRef {
                ns: ns.to_string(),
                id: id.parse()?,
            })),
            [from, predicate, to] => Ok(EventTarget::Relationship {
                from: from.parse()?,
                predicate: predicate.to_string(),
                to: to.parse()?,
            }),
            _ => Err(Error::InvalidInput(format!("unparseable event target: {s}"))),
        }
    }
}

impl Serialize for EventTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EventTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// One immutable event
///
/// Invariants: CREATE has `before = None`; hard DELETE has `after = None`;
/// UPDATE has both images populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    /// Epoch nanoseconds
    pub ts: i64,
    pub op: EventOp,
    pub target: EventTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Event {
    /// Approximate in-memory/serialized size used for buffer accounting.
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_ref() -> EntityRef {
        EntityRef::new("posts", Ulid::from_parts(1000, 1))
    }

    #[test]
    fn target_roundtrip_entity() {
        let target = EventTarget::Entity(entity_ref());
        let text = target.to_string();
        assert!(text.starts_with("posts:"));
        assert_eq!(text.parse::<EventTarget>().unwrap(), target);
    }

    #[test]
    fn target_roundtrip_relationship() {
        let target = EventTarget::Relationship {
            from: entity_ref(),
            predicate: "author".into(),
            to: EntityRef::new("users", Ulid::from_parts(1000, 2)),
        };
        let text = target.to_string();
        assert_eq!(text.matches(':').count(), 2);
        assert_eq!(text.parse::<EventTarget>().unwrap(), target);
    }

    #[test]
    fn event_json_roundtrip() {
        let event = Event {
            id: Ulid::from_parts(2000, 3),
            ts: 2_000_000_000,
            op: EventOp::Update,
            target: EventTarget::Entity(entity_ref()),
            before: Some(serde_json::json!({"title": "A"})),
            after: Some(serde_json::json!({"title": "B"})),
            actor: "amy".into(),
            metadata: None,
        };
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains("\"UPDATE\""));
        let parsed: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn op_parse() {
        assert_eq!("CREATE".parse::<EventOp>().unwrap(), EventOp::Create);
        assert!("create".parse::<EventOp>().is_err());
    }
}
