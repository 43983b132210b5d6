//! Vocabulary lookup: the word store interface and the in-memory store.
//!
//! The analyzer only ever reads from the store, one lookup per candidate
//! span text. Unknown spans are an empty result, not an error. Rows carry
//! the raw type tag from the store (`w` partial, `W` word, `H` house
//! number, `P` postcode, `S` qualifier/category, `C` country); mapping tags
//! to token types, and rejecting unknown ones, is the analyzer's job.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("vocabulary backend unavailable: {0}")]
    Unavailable(String),
    #[error("malformed vocabulary data: {0}")]
    Data(String),
}

/// One row returned by a vocabulary lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VocabEntry {
    pub id: i64,
    /// Raw type tag as stored.
    pub kind: char,
    /// Untransliterated word, if the store keeps one.
    pub word: Option<String>,
    /// Structured metadata, e.g. `{"op": "in"}` on category entries.
    pub info: Option<serde_json::Value>,
    /// Match penalty assigned by the store. Lower is better.
    pub penalty: f32,
}

/// Read-only vocabulary store. Implementations must be safe for concurrent
/// lookups from multiple in-flight analyses.
#[async_trait]
pub trait WordStore: Send + Sync {
    /// All entries whose token matches `term` exactly. Empty for unknown
    /// terms.
    async fn lookup(&self, term: &str) -> Result<Vec<VocabEntry>, StoreError>;
}

/// In-memory word store. Handy for tests and for small static
/// vocabularies loaded at startup.
#[derive(Debug, Default)]
pub struct MemoryWordStore {
    words: RwLock<HashMap<String, Vec<VocabEntry>>>,
}

impl MemoryWordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vocabulary entry under `token` with zero store penalty.
    pub fn add_word(
        &self,
        id: i64,
        token: &str,
        kind: char,
        word: Option<&str>,
        info: Option<serde_json::Value>,
    ) {
        self.push(
            token,
            VocabEntry {
                id,
                kind,
                word: word.map(str::to_string),
                info,
                penalty: 0.0,
            },
        );
    }

    /// Register a fully specified entry.
    pub fn push(&self, token: &str, entry: VocabEntry) {
        self.words
            .write()
            .entry(token.to_string())
            .or_default()
            .push(entry);
    }
}

#[async_trait]
impl WordStore for MemoryWordStore {
    async fn lookup(&self, term: &str) -> Result<Vec<VocabEntry>, StoreError> {
        Ok(self.words.read().get(term).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_terms_return_empty() {
        let store = MemoryWordStore::new();
        assert!(store.lookup("nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entries_accumulate_per_token() {
        let store = MemoryWordStore::new();
        store.add_word(1, "main", 'w', Some("Main"), None);
        store.add_word(2, "main", 'W', Some("Main"), None);

        let entries = store.lookup("main").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, 'w');
        assert_eq!(entries[1].id, 2);
    }
}
