//! Update operators
//!
//! `$set`, `$unset`, `$inc`, `$push` (with `$each`), `$pull`, plus the
//! relationship operators `$link`/`$unlink` which are extracted here and
//! executed by the store after the field mutation commits. A patch without
//! any `$`-operator is treated as a bare `$set`.

use serde_json::{Map, Value};

use parquedb_core::error::{Error, Result};

/// A link/unlink request pulled out of a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOp {
    pub predicate: String,
    pub target: String,
    pub unlink: bool,
}

/// Outcome of applying a patch to a document
#[derive(Debug, Default)]
pub struct PatchOutcome {
    pub links: Vec<LinkOp>,
}

fn as_object(value: &Value, what: &str) -> Result<Map<String, Value>> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| Error::InvalidInput(format!("{what} must be an object")))
}

fn apply_set(doc: &mut Map<String, Value>, fields: &Value) -> Result<()> {
    for (key, value) in as_object(fields, "$set")? {
        doc.insert(key, value);
    }
    Ok(())
}

fn apply_unset(doc: &mut Map<String, Value>, fields: &Value) -> Result<()> {
    for (key, _) in as_object(fields, "$unset")? {
        doc.remove(&key);
    }
    Ok(())
}

fn apply_inc(doc: &mut Map<String, Value>, fields: &Value) -> Result<()> {
    for (key, delta) in as_object(fields, "$inc")? {
        let delta = delta
            .as_f64()
            .ok_or_else(|| Error::InvalidInput(format!("$inc on {key} needs a number")))?;
        let current = doc.get(&key).and_then(Value::as_f64).unwrap_or(0.0);
        let next = current + delta;
        // keep integers integral
        let value = if next.fract() == 0.0 && next.abs() < i64::MAX as f64 {
            Value::from(next as i64)
        } else {
            serde_json::Number::from_f64(next)
                .map(Value::Number)
                .ok_or_else(|| Error::InvalidInput(format!("$inc on {key} overflowed")))?
        };
        doc.insert(key, value);
    }
    Ok(())
}

fn apply_push(doc: &mut Map<String, Value>, fields: &Value) -> Result<()> {
    for (key, spec) in as_object(fields, "$push")? {
        let additions: Vec<Value> = match &spec {
            Value::Object(obj) if obj.contains_key("$each") => obj["$each"]
                .as_array()
                .cloned()
                .ok_or_else(|| Error::InvalidInput(format!("$each on {key} needs an array")))?,
            single => vec![single.clone()],
        };
        match doc.get_mut(&key) {
            Some(Value::Array(items)) => items.extend(additions),
            Some(_) => {
                return Err(Error::InvalidInput(format!("$push target {key} is not an array")))
            }
            None => {
                doc.insert(key, Value::Array(additions));
            }
        }
    }
    Ok(())
}

fn apply_pull(doc: &mut Map<String, Value>, fields: &Value) -> Result<()> {
    for (key, unwanted) in as_object(fields, "$pull")? {
        if let Some(Value::Array(items)) = doc.get_mut(&key) {
            items.retain(|item| *item != unwanted);
        }
    }
    Ok(())
}

fn extract_links(outcome: &mut PatchOutcome, fields: &Value, unlink: bool) -> Result<()> {
    let op = if unlink { "$unlink" } else { "$link" };
    for (predicate, target) in as_object(fields, op)? {
        let targets: Vec<String> = match target {
            Value::String(s) => vec![s],
            Value::Array(items) => items
                .into_iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        Error::InvalidInput(format!("{op} targets must be ns/id strings"))
                    })
                })
                .collect::<Result<_>>()?,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "{op} on {predicate} must be a ns/id string or array"
                )))
            }
        };
        for target in targets {
            outcome.links.push(LinkOp {
                predicate: predicate.clone(),
                target,
                unlink,
            });
        }
    }
    Ok(())
}

/// Apply a patch in place. Operator clauses run in a fixed order
/// (set, unset, inc, push, pull); plain top-level fields act as `$set`.
pub fn apply_patch(doc: &mut Map<String, Value>, patch: &Value) -> Result<PatchOutcome> {
    let clauses = as_object(patch, "patch")?;
    let mut outcome = PatchOutcome::default();

    let mut plain = Map::new();
    for (key, value) in &clauses {
        match key.as_str() {
            "$set" => apply_set(doc, value)?,
            "$unset" => apply_unset(doc, value)?,
            "$inc" => apply_inc(doc, value)?,
            "$push" => apply_push(doc, value)?,
            "$pull" => apply_pull(doc, value)?,
            "$link" => extract_links(&mut outcome, value, false)?,
            "$unlink" => extract_links(&mut outcome, value, true)?,
            other if other.starts_with('$') => {
                return Err(Error::InvalidInput(format!("unknown update operator {other}")))
            }
            _ => {
                plain.insert(key.clone(), value.clone());
            }
        }
    }
    if !plain.is_empty() {
        apply_set(doc, &Value::Object(plain))?;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Map<String, Value> {
        json!({"title": "A", "views": 10, "tags": ["a", "b"]})
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn set_and_unset() {
        let mut d = doc();
        apply_patch(&mut d, &json!({"$set": {"title": "B", "new": true}})).unwrap();
        assert_eq!(d["title"], "B");
        assert_eq!(d["new"], true);
        apply_patch(&mut d, &json!({"$unset": {"new": ""}})).unwrap();
        assert!(!d.contains_key("new"));
    }

    #[test]
    fn bare_fields_are_set() {
        let mut d = doc();
        apply_patch(&mut d, &json!({"title": "C"})).unwrap();
        assert_eq!(d["title"], "C");
    }

    #[test]
    fn inc_creates_and_adds() {
        let mut d = doc();
        apply_patch(&mut d, &json!({"$inc": {"views": 5, "fresh": 2}})).unwrap();
        assert_eq!(d["views"], 15);
        assert_eq!(d["fresh"], 2);
        apply_patch(&mut d, &json!({"$inc": {"views": -20}})).unwrap();
        assert_eq!(d["views"], -5);
        apply_patch(&mut d, &json!({"$inc": {"ratio": 0.5}})).unwrap();
        assert_eq!(d["ratio"], 0.5);
    }

    #[test]
    fn push_single_each_and_pull() {
        let mut d = doc();
        apply_patch(&mut d, &json!({"$push": {"tags": "c"}})).unwrap();
        assert_eq!(d["tags"], json!(["a", "b", "c"]));
        apply_patch(&mut d, &json!({"$push": {"tags": {"$each": ["d", "e"]}}})).unwrap();
        assert_eq!(d["tags"], json!(["a", "b", "c", "d", "e"]));
        apply_patch(&mut d, &json!({"$pull": {"tags": "b"}})).unwrap();
        assert_eq!(d["tags"], json!(["a", "c", "d", "e"]));
        // pushing onto a missing field creates the array
        apply_patch(&mut d, &json!({"$push": {"likes": "amy"}})).unwrap();
        assert_eq!(d["likes"], json!(["amy"]));
    }

    #[test]
    fn push_on_scalar_fails() {
        let mut d = doc();
        assert!(apply_patch(&mut d, &json!({"$push": {"title": "x"}})).is_err());
    }

    #[test]
    fn link_extraction() {
        let mut d = doc();
        let outcome = apply_patch(
            &mut d,
            &json!({
                "$link": {"author": "users/01ARZ3NDEKTSV4RRFFQ69G5FAV"},
                "$unlink": {"editor": ["users/01ARZ3NDEKTSV4RRFFQ69G5FAW"]}
            }),
        )
        .unwrap();
        assert_eq!(outcome.links.len(), 2);
        assert_eq!(outcome.links[0].predicate, "author");
        assert!(!outcome.links[0].unlink);
        assert!(outcome.links[1].unlink);
        // link operators never touch document fields
        assert!(!d.contains_key("author"));
    }

    #[test]
    fn unknown_operator_rejected() {
        let mut d = doc();
        assert!(apply_patch(&mut d, &json!({"$rename": {"a": "b"}})).is_err());
    }
}
