//! Full-text index
//!
//! A JSON blob per indexed field: lowercase alphanumeric tokens mapped to
//! posting lists of doc ids. Queries AND their tokens; scores count matched
//! tokens weighted by inverse document frequency. Equality and range
//! operators never touch FTS entries.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use parquedb_core::error::{Error, Result};
use parquedb_core::query::tokenize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtsIndex {
    pub field: String,
    pub doc_count: u64,
    /// token -> sorted doc ids
    pub postings: BTreeMap<String, Vec<String>>,
}

impl FtsIndex {
    /// Build from `(doc_id, text)` pairs.
    pub fn build(field: impl Into<String>, docs: &[(String, String)]) -> Self {
        let mut postings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (doc_id, text) in docs {
            for token in tokenize(text) {
                postings.entry(token).or_default().insert(doc_id.clone());
            }
        }
        Self {
            field: field.into(),
            doc_count: docs.len() as u64,
            postings: postings
                .into_iter()
                .map(|(token, ids)| (token, ids.into_iter().collect()))
                .collect(),
        }
    }

    /// All-token match with idf-weighted scores, best first.
    pub fn search(&self, query: &str) -> Vec<(String, f64)> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut scores: BTreeMap<&str, f64> = BTreeMap::new();
        let mut matched: BTreeMap<&str, usize> = BTreeMap::new();
        for token in &tokens {
            let Some(ids) = self.postings.get(token) else {
                return Vec::new(); // a missing token empties the AND
            };
            let idf = ((self.doc_count as f64 + 1.0) / (ids.len() as f64 + 1.0)).ln() + 1.0;
            for id in ids {
                *scores.entry(id).or_insert(0.0) += idf;
                *matched.entry(id).or_insert(0) += 1;
            }
        }

        let mut hits: Vec<(String, f64)> = scores
            .into_iter()
            .filter(|(id, _)| matched[id] == tokens.len())
            .map(|(id, score)| (id.to_string(), score))
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Codec(format!("fts index: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<FtsIndex> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("fts index: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> FtsIndex {
        let docs = vec![
            ("posts/1".to_string(), "Intro to Parquet storage".to_string()),
            ("posts/2".to_string(), "Parquet and Arrow internals".to_string()),
            ("posts/3".to_string(), "Cooking with cast iron".to_string()),
        ];
        FtsIndex::build("title", &docs)
    }

    #[test]
    fn single_token() {
        let hits = index().search("parquet");
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"posts/1") && ids.contains(&"posts/2"));
    }

    #[test]
    fn all_tokens_required() {
        let hits = index().search("parquet storage");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "posts/1");
        assert!(index().search("parquet cooking").is_empty());
    }

    #[test]
    fn case_and_punctuation_insensitive() {
        let hits = index().search("PARQUET, storage!");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn rarer_tokens_score_higher() {
        let idx = index();
        let storage = idx.search("storage"); // 1 doc
        let parquet = idx.search("parquet"); // 2 docs
        assert!(storage[0].1 > parquet[0].1);
    }

    #[test]
    fn empty_query_and_unknown_token() {
        assert!(index().search("").is_empty());
        assert!(index().search("nonexistent").is_empty());
    }

    #[test]
    fn roundtrip() {
        let idx = index();
        let parsed = FtsIndex::from_bytes(&idx.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, idx);
    }
}
