//! Filter evaluation
//!
//! Filters are JSON documents in the familiar operator style:
//! `{"title": "A"}`, `{"views": {"$gt": 10}}`, `{"$or": [...]}`. The same
//! representation drives both in-memory evaluation here and index selection
//! in the index crate.

use serde_json::Value;

/// Ordering comparison on JSON scalars. Numbers compare numerically,
/// strings lexicographically; mixed types do not compare.
pub fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64()?;
            let y = y.as_f64()?;
            x.partial_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Tokenize text for `$text` matching: lowercase, split on non-alphanumerics.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn text_matches(haystack: &Value, query: &str) -> bool {
    let Value::String(text) = haystack else {
        return false;
    };
    let tokens = tokenize(text);
    tokenize(query).iter().all(|needle| tokens.contains(needle))
}

fn field_matches(doc_value: Option<&Value>, condition: &Value) -> bool {
    match condition {
        // operator object: every operator must hold
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, operand)| {
                let current = doc_value;
                match op.as_str() {
                    "$eq" => current == Some(operand),
                    "$ne" => current != Some(operand),
                    "$gt" => current.and_then(|v| compare_values(v, operand))
                        == Some(std::cmp::Ordering::Greater),
                    "$gte" => matches!(
                        current.and_then(|v| compare_values(v, operand)),
                        Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                    ),
                    "$lt" => current.and_then(|v| compare_values(v, operand))
                        == Some(std::cmp::Ordering::Less),
                    "$lte" => matches!(
                        current.and_then(|v| compare_values(v, operand)),
                        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                    ),
                    "$in" => operand
                        .as_array()
                        .is_some_and(|candidates| current.is_some_and(|v| candidates.contains(v))),
                    "$exists" => {
                        let wanted = operand.as_bool().unwrap_or(true);
                        current.is_some() == wanted
                    }
                    "$text" => operand
                        .as_str()
                        .is_some_and(|q| current.is_some_and(|v| text_matches(v, q))),
                    _ => false,
                }
            })
        }
        // plain value: equality, with array containment for array fields
        expected => match doc_value {
            Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
            Some(actual) => actual == expected,
            None => expected.is_null(),
        },
    }
}

/// Evaluate a filter against a document.
pub fn matches_filter(doc: &Value, filter: &Value) -> bool {
    let Value::Object(clauses) = filter else {
        return true;
    };
    clauses.iter().all(|(key, condition)| match key.as_str() {
        "$and" => condition
            .as_array()
            .is_some_and(|subs| subs.iter().all(|sub| matches_filter(doc, sub))),
        "$or" => condition
            .as_array()
            .is_some_and(|subs| subs.iter().any(|sub| matches_filter(doc, sub))),
        "$not" => !matches_filter(doc, condition),
        field => field_matches(doc.get(field), condition),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "$type": "Post",
            "name": "Hello World",
            "title": "intro to parquet",
            "views": 42,
            "tags": ["rust", "storage"],
            "draft": false
        })
    }

    #[test]
    fn equality_and_operators() {
        let d = doc();
        assert!(matches_filter(&d, &json!({"views": 42})));
        assert!(matches_filter(&d, &json!({"views": {"$eq": 42}})));
        assert!(matches_filter(&d, &json!({"views": {"$gt": 40, "$lt": 50}})));
        assert!(!matches_filter(&d, &json!({"views": {"$gte": 43}})));
        assert!(matches_filter(&d, &json!({"views": {"$lte": 42}})));
        assert!(!matches_filter(&d, &json!({"title": "other"})));
    }

    #[test]
    fn in_and_exists() {
        let d = doc();
        assert!(matches_filter(&d, &json!({"$type": {"$in": ["Post", "Page"]}})));
        assert!(!matches_filter(&d, &json!({"$type": {"$in": ["Page"]}})));
        assert!(matches_filter(&d, &json!({"title": {"$exists": true}})));
        assert!(matches_filter(&d, &json!({"missing": {"$exists": false}})));
    }

    #[test]
    fn array_containment() {
        let d = doc();
        assert!(matches_filter(&d, &json!({"tags": "rust"})));
        assert!(!matches_filter(&d, &json!({"tags": "python"})));
    }

    #[test]
    fn logical_operators() {
        let d = doc();
        assert!(matches_filter(
            &d,
            &json!({"$and": [{"views": {"$gt": 1}}, {"draft": false}]})
        ));
        assert!(matches_filter(
            &d,
            &json!({"$or": [{"views": 0}, {"$type": "Post"}]})
        ));
        assert!(matches_filter(&d, &json!({"$not": {"draft": true}})));
        assert!(!matches_filter(&d, &json!({"$not": {"draft": false}})));
    }

    #[test]
    fn text_token_matching() {
        let d = doc();
        assert!(matches_filter(&d, &json!({"title": {"$text": "parquet"}})));
        assert!(matches_filter(&d, &json!({"title": {"$text": "Parquet INTRO"}})));
        assert!(!matches_filter(&d, &json!({"title": {"$text": "arrow"}})));
        // $text never matches non-string fields
        assert!(!matches_filter(&d, &json!({"views": {"$text": "42"}})));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches_filter(&doc(), &json!({})));
    }

    #[test]
    fn tokenizer_splits_on_non_alphanumerics() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
        assert_eq!(tokenize("a-b_c 3"), vec!["a", "b", "c", "3"]);
        assert!(tokenize("  ").is_empty());
    }
}
