//! Long-term storage interface.
//!
//! The retrieval pipeline treats storage as an opaque nearest-neighbor
//! service: it hands over texts with [`ChunkMetadata`] and gets back
//! [`SearchHit`]s with distances, never seeing embeddings or the index
//! layout. [`sqlite::SqliteVectorStore`] is the shipped implementation.

pub mod sqlite;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Where a stored chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Scraped web page content.
    Web,
    /// Plain text or markdown file.
    Text,
    /// Flattened JSON document or list item.
    Json,
    /// Linearized CSV row.
    Tabular,
    /// Raw text added directly by the user.
    UserInput,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Text => "text",
            Self::Json => "json",
            Self::Tabular => "tabular",
            Self::UserInput => "user_input",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Self::Web),
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "tabular" => Ok(Self::Tabular),
            "user_input" => Ok(Self::UserInput),
            _ => Err(format!("unknown content kind: {s}")),
        }
    }
}

/// Descriptive fields attached to a chunk at creation; never mutated after
/// the write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ContentKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
}

impl ChunkMetadata {
    pub fn new(source: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            source: Some(source.into()),
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn user_input() -> Self {
        Self {
            kind: Some(ContentKind::UserInput),
            ..Default::default()
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_chunk_index(mut self, index: usize) -> Self {
        self.chunk_index = Some(index);
        self
    }

    pub fn with_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_item_index(mut self, index: usize) -> Self {
        self.item_index = Some(index);
        self
    }
}

/// One nearest-neighbor result: stored text, its metadata, and a distance
/// score where smaller means more relevant.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f64,
}

/// Opaque vector-search collaborator consumed by the retrieval pipeline.
pub trait VectorStore {
    /// Upsert a batch of texts with their metadata. Returns the stored count.
    fn upsert_batch(&mut self, texts: &[String], metadatas: &[ChunkMetadata]) -> Result<usize>;

    /// Nearest-neighbor search. When `max_distance` is given, hits farther
    /// than the threshold are excluded. Results are ordered by ascending
    /// distance.
    fn search(&self, query: &str, top_k: usize, max_distance: Option<f64>)
        -> Result<Vec<SearchHit>>;

    /// Return the closest stored text if it is within `threshold`, else None.
    fn find_nearest(&self, text: &str, threshold: f64) -> Result<Option<String>>;

    /// Remove every chunk whose source matches `source`.
    fn delete_by_source(&mut self, source: &str) -> Result<()>;

    /// Number of stored chunks.
    fn count(&self) -> Result<u64>;
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Convert an L2 distance between unit vectors to cosine distance.
///
/// For L2-normalized embeddings, `cos_dist = l2^2 / 2`, which maps the raw
/// vec0 distance onto the `[0, 2]` cosine-distance scale the retrieval
/// thresholds are expressed in.
pub fn l2_to_cosine_distance(l2: f64) -> f64 {
    (l2 * l2) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_kind_round_trips() {
        for kind in [
            ContentKind::Web,
            ContentKind::Text,
            ContentKind::Json,
            ContentKind::Tabular,
            ContentKind::UserInput,
        ] {
            assert_eq!(kind.as_str().parse::<ContentKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<ContentKind>().is_err());
    }

    #[test]
    fn metadata_serializes_sparsely() {
        let meta = ChunkMetadata::new("https://example.com", ContentKind::Web)
            .with_chunk_index(3);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["source"], "https://example.com");
        assert_eq!(json["kind"], "web");
        assert_eq!(json["chunk_index"], 3);
        assert!(json.get("page").is_none());
    }

    #[test]
    fn l2_cosine_conversion() {
        // Orthogonal unit vectors: l2 = sqrt(2), cosine distance = 1.0
        let l2 = 2.0f64.sqrt();
        assert!((l2_to_cosine_distance(l2) - 1.0).abs() < 1e-9);
        // Identical vectors: both zero
        assert_eq!(l2_to_cosine_distance(0.0), 0.0);
    }
}
