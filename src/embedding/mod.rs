//! Text-to-vector embedding.
//!
//! The vector store owns a boxed [`Embedder`]; the retrieval pipeline never
//! sees raw vectors. The shipped implementation runs all-MiniLM-L6-v2
//! locally through ONNX Runtime (384 dimensions, L2-normalized).

pub mod local;

use anyhow::Result;

/// Embedding width of all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Produces L2-normalized vectors of exactly [`EMBEDDING_DIM`] dimensions.
/// All methods are synchronous; async callers should wrap them in
/// `tokio::task::spawn_blocking`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create an embedder from config. Only `"local"` is supported; model files
/// must exist already — run `engram model download` first.
pub fn create_embedder(config: &crate::config::EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "local" => Ok(Box::new(local::OnnxEmbedder::new(config)?)),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}
