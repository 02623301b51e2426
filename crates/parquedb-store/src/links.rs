//! Inline link detection
//!
//! Values inside create() data that look like entity references become link
//! calls: a bare `"otherNs/otherId"` string, a `{"display": "otherNs/otherId"}`
//! object, or an array of either. The field value itself stays in the
//! document; only the edge is derived from it.

use serde_json::Value;

use parquedb_core::types::EntityRef;

/// One detected inline link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineLink {
    pub predicate: String,
    pub target: EntityRef,
}

fn parse_ref(value: &Value) -> Option<EntityRef> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Object(obj) => obj.get("display")?.as_str()?.parse().ok(),
        _ => None,
    }
}

/// Scan top-level fields for reference-shaped values.
pub fn detect_inline_links(data: &serde_json::Map<String, Value>) -> Vec<InlineLink> {
    let mut links = Vec::new();
    for (field, value) in data {
        if field.starts_with('$') {
            continue;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(target) = parse_ref(item) {
                        links.push(InlineLink {
                            predicate: field.clone(),
                            target,
                        });
                    }
                }
            }
            other => {
                if let Some(target) = parse_ref(other) {
                    links.push(InlineLink {
                        predicate: field.clone(),
                        target,
                    });
                }
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquedb_core::ulid::Ulid;
    use serde_json::json;

    fn ulid() -> Ulid {
        Ulid::from_parts(1_700_000_000_000, 7)
    }

    fn data(value: Value) -> serde_json::Map<String, Value> {
        json!({"author": value, "title": "plain text"})
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn bare_reference_string() {
        let links = detect_inline_links(&data(json!(format!("users/{}", ulid()))));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].predicate, "author");
        assert_eq!(links[0].target, EntityRef::new("users", ulid()));
    }

    #[test]
    fn display_object() {
        let links = detect_inline_links(&data(json!({
            "display": format!("users/{}", ulid()),
            "role": "primary"
        })));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target.ns, "users");
    }

    #[test]
    fn arrays_of_references() {
        let a = Ulid::from_parts(1, 1);
        let b = Ulid::from_parts(1, 2);
        let links = detect_inline_links(&data(json!([
            format!("users/{a}"),
            {"display": format!("users/{b}")}
        ])));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn non_references_ignored() {
        // plain strings, non-ulid ids and numbers are not references
        assert!(detect_inline_links(&data(json!("just words"))).is_empty());
        assert!(detect_inline_links(&data(json!("users/not-a-ulid"))).is_empty());
        assert!(detect_inline_links(&data(json!(42))).is_empty());
        assert!(detect_inline_links(&data(json!({"display": 42}))).is_empty());
    }
}
