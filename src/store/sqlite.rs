//! SQLite-backed vector store.
//!
//! Chunks live in a `chunks` table with their metadata as JSON; embeddings
//! live in a `chunks_vec` vec0 virtual table keyed by the same deterministic
//! content-hash ID, so re-ingesting identical content upserts instead of
//! duplicating. The store owns its [`Embedder`] — callers hand over plain
//! text on both the write and read paths.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

use super::{
    embedding_to_bytes, l2_to_cosine_distance, ChunkMetadata, SearchHit, VectorStore,
};
use crate::embedding::{Embedder, EMBEDDING_DIM};

/// Rows per upsert transaction.
const BATCH_SIZE: usize = 256;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    source TEXT,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vec USING vec0(
    id TEXT PRIMARY KEY,
    embedding FLOAT[384]
);
"#;

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;
    Ok(())
}

pub struct SqliteVectorStore {
    conn: Connection,
    embedder: Box<dyn Embedder>,
}

impl SqliteVectorStore {
    /// Open (or create) the database at `path` with schema initialized.
    pub fn open(path: impl AsRef<Path>, embedder: Box<dyn Embedder>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        load_sqlite_vec();

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        init_schema(&conn).context("failed to initialize schema")?;

        tracing::info!(path = %path.display(), "vector store opened");
        Ok(Self { conn, embedder })
    }

    /// Open an in-memory store, used by tests and throwaway sessions.
    pub fn open_in_memory(embedder: Box<dyn Embedder>) -> Result<Self> {
        load_sqlite_vec();
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        init_schema(&conn).context("failed to initialize schema")?;
        Ok(Self { conn, embedder })
    }

    /// Deterministic content-hash ID: the same chunk from the same place is
    /// never stored twice.
    fn make_chunk_id(text: &str, metadata: &ChunkMetadata) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.trim().to_lowercase().as_bytes());
        if let Some(source) = &metadata.source {
            hasher.update(source.as_bytes());
        }
        if let Some(index) = metadata.chunk_index {
            hasher.update(index.to_string().as_bytes());
        }
        if let Some(page) = metadata.page {
            hasher.update(page.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// KNN over the vec0 table, distances converted to the cosine scale.
    fn knn(&self, embedding: &[f32], limit: usize) -> Result<Vec<(String, f64)>> {
        let embedding_bytes = embedding_to_bytes(embedding);
        let mut stmt = self.conn.prepare(
            "SELECT id, distance FROM chunks_vec \
             WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![embedding_bytes, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(id, l2)| (id, l2_to_cosine_distance(l2)))
            .collect())
    }

    fn fetch_chunk(&self, id: &str) -> Result<Option<(String, ChunkMetadata)>> {
        use rusqlite::OptionalExtension;
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT content, metadata FROM chunks WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((content, metadata_json)) => {
                let metadata = serde_json::from_str(&metadata_json)
                    .context("corrupt metadata JSON in chunks table")?;
                Ok(Some((content, metadata)))
            }
            None => Ok(None),
        }
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert_batch(&mut self, texts: &[String], metadatas: &[ChunkMetadata]) -> Result<usize> {
        anyhow::ensure!(
            texts.len() == metadatas.len(),
            "texts and metadatas must have equal length ({} vs {})",
            texts.len(),
            metadatas.len()
        );
        if texts.is_empty() {
            return Ok(0);
        }

        let mut total = 0;
        for batch_start in (0..texts.len()).step_by(BATCH_SIZE) {
            let batch_end = (batch_start + BATCH_SIZE).min(texts.len());
            let batch: Vec<&str> = texts[batch_start..batch_end]
                .iter()
                .map(|t| t.as_str())
                .collect();
            let embeddings = self.embedder.embed_batch(&batch)?;

            let tx = self.conn.transaction()?;
            let now = chrono::Utc::now().to_rfc3339();
            for (offset, (text, embedding)) in batch.iter().zip(&embeddings).enumerate() {
                let metadata = &metadatas[batch_start + offset];
                let id = Self::make_chunk_id(text, metadata);
                let metadata_json = serde_json::to_string(metadata)?;

                tx.execute(
                    "INSERT OR REPLACE INTO chunks (id, content, source, metadata, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, text, metadata.source, metadata_json, now],
                )?;
                // vec0 has no upsert; replace the row by hand
                tx.execute("DELETE FROM chunks_vec WHERE id = ?1", params![id])?;
                tx.execute(
                    "INSERT INTO chunks_vec (id, embedding) VALUES (?1, ?2)",
                    params![id, embedding_to_bytes(embedding)],
                )?;
                total += 1;
            }
            tx.commit()?;
        }

        tracing::debug!(count = total, "upserted chunk batch");
        Ok(total)
    }

    fn search(
        &self,
        query: &str,
        top_k: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query)?;
        anyhow::ensure!(
            embedding.len() == EMBEDDING_DIM,
            "embedder produced {} dimensions, expected {EMBEDDING_DIM}",
            embedding.len()
        );

        let mut hits = Vec::new();
        for (id, distance) in self.knn(&embedding, top_k)? {
            if let Some(max) = max_distance {
                if distance > max {
                    // Results are ordered by distance; nothing closer follows
                    break;
                }
            }
            if let Some((text, metadata)) = self.fetch_chunk(&id)? {
                hits.push(SearchHit {
                    text,
                    metadata,
                    distance,
                });
            }
        }
        Ok(hits)
    }

    fn find_nearest(&self, text: &str, threshold: f64) -> Result<Option<String>> {
        let hits = self.search(text, 1, None)?;
        Ok(hits
            .into_iter()
            .next()
            .filter(|hit| hit.distance <= threshold)
            .map(|hit| hit.text))
    }

    fn delete_by_source(&mut self, source: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks_vec WHERE id IN (SELECT id FROM chunks WHERE source = ?1)",
            params![source],
        )?;
        let removed = tx.execute("DELETE FROM chunks WHERE source = ?1", params![source])?;
        tx.commit()?;
        tracing::info!(source, removed, "deleted chunks by source");
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
