//! Bounded semantic response cache with LRU eviction.
//!
//! Keys are SHA-256 fingerprints of normalized queries; values are fully
//! rendered responses. Lookup is two-tier: an exact fingerprint match first,
//! then a fuzzy pass that asks the vector store for the nearest stored text
//! within a similarity threshold and retries that text's fingerprint. Any
//! write to long-term memory clears the cache wholesale.

use anyhow::Result;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::store::VectorStore;

/// Deterministic fingerprint of a query: SHA-256 over the trimmed,
/// lowercased text, hex-encoded. Insensitive to case and surrounding
/// whitespace.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.trim().to_lowercase().as_bytes());
    hex::encode(digest)
}

/// Access-ordered fingerprint → response map. The IndexMap keeps insertion
/// order, so refreshing an entry (remove + re-insert) moves it to the
/// most-recently-used end and index 0 is always the eviction candidate.
pub struct SemanticCache {
    entries: IndexMap<String, String>,
    max_entries: usize,
    similarity_threshold: f64,
}

impl SemanticCache {
    pub fn new(max_entries: usize, similarity_threshold: f64) -> Self {
        Self {
            entries: IndexMap::new(),
            max_entries,
            similarity_threshold,
        }
    }

    /// Two-tier lookup. Tier 1 is the O(1) exact-fingerprint fast path;
    /// tier 2 costs one nearest-neighbor call against the store.
    pub fn get(&mut self, query: &str, store: &dyn VectorStore) -> Result<Option<String>> {
        let key = fingerprint(query);

        if let Some(hit) = self.touch(&key) {
            return Ok(Some(hit));
        }

        if let Some(nearest) = store.find_nearest(query, self.similarity_threshold)? {
            let nearest_key = fingerprint(&nearest);
            if let Some(hit) = self.touch(&nearest_key) {
                return Ok(Some(hit));
            }
        }

        Ok(None)
    }

    /// Insert or refresh an entry as most-recently-used, then evict from the
    /// least-recently-used end until the size bound holds.
    pub fn put(&mut self, query: &str, response: &str) {
        let key = fingerprint(query);
        self.entries.shift_remove(&key);
        self.entries.insert(key, response.to_string());

        while self.entries.len() > self.max_entries {
            self.entries.shift_remove_index(0);
        }
    }

    /// Empty the cache unconditionally. Called on every long-term write so
    /// stale context is never served.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Mark `key` most-recently-used and return its value, if present.
    fn touch(&mut self, key: &str) -> Option<String> {
        let value = self.entries.shift_remove(key)?;
        self.entries.insert(key.to_string(), value.clone());
        Some(value)
    }

    #[cfg(test)]
    fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_str()).collect()
    }
}
