#![allow(dead_code)]

use anyhow::Result;

use engram::brain::MemoryEngine;
use engram::config::EngramConfig;
use engram::embedding::{Embedder, EMBEDDING_DIM};
use engram::store::sqlite::SqliteVectorStore;

/// Deterministic bag-of-words embedder: each word hashes to a dimension and
/// the vector is L2-normalized, so texts sharing words land close together
/// and texts with no words in common are (near-)orthogonal. Good enough to
/// exercise the full retrieval pipeline without model files.
pub struct BagEmbedder;

fn word_dim(word: &str) -> usize {
    word.bytes()
        .fold(0usize, |acc, b| (acc.wrapping_mul(31).wrapping_add(b as usize)) % EMBEDDING_DIM)
}

impl Embedder for BagEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for word in text.to_lowercase().split_whitespace() {
            let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            if !word.is_empty() {
                v[word_dim(&word)] += 1.0;
            }
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Fresh in-memory vector store backed by the bag-of-words embedder.
pub fn test_store() -> SqliteVectorStore {
    SqliteVectorStore::open_in_memory(Box::new(BagEmbedder)).unwrap()
}

/// Engine over an in-memory store with default configuration.
pub fn test_engine() -> MemoryEngine {
    MemoryEngine::new(Box::new(test_store()), &EngramConfig::default())
}
