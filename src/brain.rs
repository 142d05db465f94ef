//! Core orchestration: ingest, chunk, cache, retrieve, rerank.
//!
//! [`MemoryEngine`] ties the pieces together: a [`VectorStore`] for
//! long-term memory, a [`SemanticCache`] for repeated queries, and a
//! short-term conversational buffer. Every write to long-term memory
//! invalidates the cache.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::Result;

use crate::cache::{fingerprint, SemanticCache};
use crate::chunk::chunk_text;
use crate::config::EngramConfig;
use crate::crawl;
use crate::loader::{self, Document};
use crate::store::{ChunkMetadata, ContentKind, VectorStore};

/// Raw chunk size used when scraping, before sentence-aware re-chunking.
const CRAWL_CHUNK_SIZE: usize = 4000;
const CRAWL_OVERLAP: usize = 200;

/// Returned when retrieval finds nothing within the distance bound.
pub const NO_MEMORIES: &str = "No relevant memories found for this query.";

/// Snapshot of memory state, for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub long_term_count: u64,
    pub short_term_count: usize,
    pub cache_size: usize,
    pub cache_max: usize,
}

pub struct MemoryEngine {
    store: Box<dyn VectorStore>,
    cache: SemanticCache,
    short_term: VecDeque<String>,
    chunk_size: usize,
    chunk_overlap: usize,
    max_distance: f64,
    default_results: usize,
    short_term_limit: usize,
}

impl MemoryEngine {
    pub fn new(store: Box<dyn VectorStore>, config: &EngramConfig) -> Self {
        Self {
            store,
            cache: SemanticCache::new(
                config.cache.max_entries,
                config.cache.similarity_threshold,
            ),
            short_term: VecDeque::new(),
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            max_distance: config.retrieval.max_distance,
            default_results: config.retrieval.default_results,
            short_term_limit: config.retrieval.short_term_limit,
        }
    }

    pub fn default_results(&self) -> usize {
        self.default_results
    }

    fn chunk(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.chunk_size, self.chunk_overlap, true)
    }

    /// Chunk each document, attach chunk indices, and upsert everything.
    /// Invalidates the cache. Returns the number of chunks stored.
    fn ingest_documents(&mut self, documents: Vec<Document>) -> Result<usize> {
        self.cache.clear();

        let mut texts = Vec::new();
        let mut metas = Vec::new();
        for doc in documents {
            for (idx, chunk) in self.chunk(&doc.text).into_iter().enumerate() {
                if chunk.trim().is_empty() {
                    continue;
                }
                texts.push(chunk);
                metas.push(doc.metadata.clone().with_chunk_index(idx));
            }
        }

        self.store.upsert_batch(&texts, &metas)
    }

    // ── ingestion ──

    /// Scrape `url` and store its content as sentence-aware chunks.
    /// Returns the number of chunks stored.
    pub async fn learn_url(
        &mut self,
        url: &str,
        follow_links: bool,
        max_pages: usize,
    ) -> Result<usize> {
        // Scrape in large raw chunks to preserve context, then re-chunk
        // with sentence awareness.
        let raw_chunks = crawl::fetch_and_chunk(
            url,
            CRAWL_CHUNK_SIZE,
            CRAWL_OVERLAP,
            follow_links,
            max_pages,
        )
        .await?;
        let full_text = raw_chunks.join("\n\n");

        let count = self.ingest_documents(vec![Document {
            text: full_text,
            metadata: ChunkMetadata::new(url, ContentKind::Web),
        }])?;
        tracing::info!(count, url, "learned from url");
        Ok(count)
    }

    /// Ingest every supported file under `folder`.
    pub fn learn_folder(&mut self, folder: &Path) -> Result<usize> {
        let documents = loader::ingest_folder(folder)?;
        let count = self.ingest_documents(documents)?;
        tracing::info!(count, folder = %folder.display(), "learned from folder");
        Ok(count)
    }

    /// Ingest a single document. When `page` is given, only segments tagged
    /// with that page number are stored.
    pub fn learn_doc(&mut self, path: &Path, page: Option<u32>) -> Result<usize> {
        let mut documents = loader::load_document(path)?;
        if let Some(wanted) = page {
            documents.retain(|doc| doc.metadata.page == Some(wanted));
        }
        let count = self.ingest_documents(documents)?;
        tracing::info!(count, path = %path.display(), "learned from document");
        Ok(count)
    }

    /// Store `text` verbatim in long-term memory and the short-term buffer.
    pub fn add_memory(&mut self, text: &str) -> Result<()> {
        self.cache.clear();
        self.store
            .upsert_batch(&[text.to_string()], &[ChunkMetadata::user_input()])?;

        self.short_term.push_back(text.to_string());
        while self.short_term.len() > self.short_term_limit {
            self.short_term.pop_front();
        }
        Ok(())
    }

    // ── retrieval ──

    /// Retrieve the best context for `query` as a rendered, citable block.
    ///
    /// Pipeline: semantic cache (exact then fuzzy), over-fetched vector
    /// search with distance filtering, self-match and duplicate removal,
    /// rerank by distance, render with short-term context, cache the result.
    pub fn recall(
        &mut self,
        query: &str,
        n_results: usize,
        include_short_term: bool,
    ) -> Result<String> {
        if let Some(cached) = self.cache.get(query, self.store.as_ref())? {
            tracing::debug!(query = %truncate_chars(query, 60), "cache hit");
            return Ok(format!("[CACHE HIT]\n{cached}"));
        }

        // Over-fetch so filtering and dedup still leave n results
        let hits = self
            .store
            .search(query, n_results * 2, Some(self.max_distance))?;

        let normalized_query = query.trim().to_lowercase();
        let mut seen = std::collections::HashSet::new();
        let mut results: Vec<_> = hits
            .into_iter()
            .filter(|hit| hit.text.trim().to_lowercase() != normalized_query)
            .filter(|hit| seen.insert(fingerprint(&hit.text)))
            .collect();

        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        results.truncate(n_results);

        if results.is_empty() {
            return Ok(NO_MEMORIES.to_string());
        }

        let mut lines = Vec::new();
        if include_short_term && !self.short_term.is_empty() {
            let recent: Vec<&str> = self
                .short_term
                .iter()
                .rev()
                .take(3)
                .map(String::as_str)
                .collect();
            let recent: Vec<&str> = recent.into_iter().rev().collect();
            lines.push(format!("[Recent Context] {}\n", recent.join(" | ")));
        }

        lines.push("Found References:".to_string());
        for (i, hit) in results.iter().enumerate() {
            let source = hit.metadata.source.as_deref().unwrap_or("unknown");
            let page = hit
                .metadata
                .page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "—".to_string());
            let relevance = ((1.0 - hit.distance).max(0.0) * 1000.0).round() / 1000.0;
            // Show more text for highly relevant results
            let preview_len = if relevance > 0.7 { 300 } else { 200 };
            let mut preview = truncate_chars(&hit.text, preview_len)
                .trim_end()
                .to_string();
            if hit.text.chars().count() > preview_len {
                preview.push('…');
            }
            lines.push(format!(
                "  [{}] (relevance: {relevance}) {preview}\n       ↳ Source: {source}, Page: {page}",
                i + 1
            ));
        }

        let response = lines.join("\n");
        self.cache.put(query, &response);
        Ok(response)
    }

    // ── management ──

    /// Clear the semantic cache only; long-term memory is untouched.
    pub fn forget_cache(&mut self) {
        self.cache.clear();
    }

    /// Delete every chunk learned from `source` (a URL or file path).
    pub fn forget_source(&mut self, source: &str) -> Result<()> {
        self.store.delete_by_source(source)?;
        self.cache.clear();
        Ok(())
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            long_term_count: self.store.count()?,
            short_term_count: self.short_term.len(),
            cache_size: self.cache.len(),
            cache_max: self.cache.max_entries(),
        })
    }
}

/// First `max` chars of `s`, never splitting a code point.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((byte_index, _)) => &s[..byte_index],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SearchHit;

    /// Store whose search returns a scripted hit list; find_nearest never
    /// matches, so only the exact cache tier can hit.
    struct ScriptedStore {
        hits: Vec<SearchHit>,
        count: u64,
        deleted_sources: Vec<String>,
    }

    impl ScriptedStore {
        fn new(hits: Vec<SearchHit>) -> Self {
            Self {
                hits,
                count: 0,
                deleted_sources: Vec::new(),
            }
        }
    }

    impl VectorStore for ScriptedStore {
        fn upsert_batch(&mut self, texts: &[String], _: &[ChunkMetadata]) -> Result<usize> {
            self.count += texts.len() as u64;
            Ok(texts.len())
        }
        fn search(
            &self,
            _: &str,
            top_k: usize,
            max_distance: Option<f64>,
        ) -> Result<Vec<SearchHit>> {
            let mut hits = self.hits.clone();
            if let Some(max) = max_distance {
                hits.retain(|h| h.distance <= max);
            }
            hits.truncate(top_k);
            Ok(hits)
        }
        fn find_nearest(&self, _: &str, _: f64) -> Result<Option<String>> {
            Ok(None)
        }
        fn delete_by_source(&mut self, source: &str) -> Result<()> {
            self.deleted_sources.push(source.to_string());
            Ok(())
        }
        fn count(&self) -> Result<u64> {
            Ok(self.count)
        }
    }

    fn hit(text: &str, distance: f64) -> SearchHit {
        SearchHit {
            text: text.to_string(),
            metadata: ChunkMetadata::new("notes.txt", ContentKind::Text).with_page(1),
            distance,
        }
    }

    fn engine(hits: Vec<SearchHit>) -> MemoryEngine {
        MemoryEngine::new(
            Box::new(ScriptedStore::new(hits)),
            &EngramConfig::default(),
        )
    }

    #[test]
    fn recall_filters_sorts_and_truncates() {
        // 1.5 exceeds the 1.2 distance bound; ties keep first-seen order
        let mut engine = engine(vec![
            hit("first fact", 0.9),
            hit("second fact", 0.3),
            hit("too far", 1.5),
            hit("third fact", 0.3),
        ]);

        let out = engine.recall("anything", 2, true).unwrap();
        assert!(!out.contains("too far"));
        assert!(!out.contains("first fact"));
        let second = out.find("second fact").unwrap();
        let third = out.find("third fact").unwrap();
        assert!(second < third);
    }

    #[test]
    fn recall_skips_trivial_self_matches() {
        let mut engine = engine(vec![hit("The Secret Phrase", 0.0)]);
        let out = engine.recall("  the secret phrase  ", 5, true).unwrap();
        assert_eq!(out, NO_MEMORIES);
    }

    #[test]
    fn recall_deduplicates_identical_chunks() {
        let mut engine = engine(vec![
            hit("same chunk", 0.2),
            hit("same chunk", 0.4),
            hit("other chunk", 0.3),
        ]);
        let out = engine.recall("query", 5, true).unwrap();
        assert_eq!(out.matches("same chunk").count(), 1);
        assert!(out.contains("other chunk"));
    }

    #[test]
    fn recall_sentinel_is_not_cached() {
        let mut engine = engine(vec![]);
        assert_eq!(engine.recall("nothing", 5, true).unwrap(), NO_MEMORIES);
        // A second identical query must not come back as a cache hit
        let again = engine.recall("nothing", 5, true).unwrap();
        assert_eq!(again, NO_MEMORIES);
    }

    #[test]
    fn repeated_query_hits_cache() {
        let mut engine = engine(vec![hit("a stored fact", 0.2)]);
        let first = engine.recall("query", 5, true).unwrap();
        assert!(!first.starts_with("[CACHE HIT]"));

        let second = engine.recall("query", 5, true).unwrap();
        assert!(second.starts_with("[CACHE HIT]\n"));
        assert_eq!(second.trim_start_matches("[CACHE HIT]\n"), first);
    }

    #[test]
    fn ingestion_invalidates_cache() {
        let mut engine = engine(vec![hit("a stored fact", 0.2)]);
        engine.recall("query", 5, true).unwrap();
        engine.add_memory("new knowledge").unwrap();

        let after = engine.recall("query", 5, true).unwrap();
        assert!(!after.starts_with("[CACHE HIT]"));
    }

    #[test]
    fn short_term_renders_last_three_in_order() {
        let mut engine = engine(vec![hit("a stored fact", 0.2)]);
        for text in ["one", "two", "three", "four"] {
            engine.add_memory(text).unwrap();
        }

        let out = engine.recall("query", 5, true).unwrap();
        assert!(out.contains("[Recent Context] two | three | four"));
    }

    #[test]
    fn short_term_can_be_excluded() {
        let mut engine = engine(vec![hit("a stored fact", 0.2)]);
        engine.add_memory("chatter").unwrap();
        let out = engine.recall("query", 5, false).unwrap();
        assert!(!out.contains("[Recent Context]"));
    }

    #[test]
    fn short_term_buffer_is_bounded() {
        let mut engine = engine(vec![]);
        for i in 0..20 {
            engine.add_memory(&format!("memory {i}")).unwrap();
        }
        let status = engine.status().unwrap();
        assert_eq!(status.short_term_count, 10);
    }

    #[test]
    fn relevance_clamps_at_zero() {
        let mut engine = engine(vec![hit("distant fact", 1.1)]);
        let out = engine.recall("query", 5, true).unwrap();
        assert!(out.contains("(relevance: 0)"));
    }

    #[test]
    fn citations_include_source_and_page() {
        let mut engine = engine(vec![hit("a stored fact", 0.2)]);
        let out = engine.recall("query", 5, true).unwrap();
        assert!(out.contains("↳ Source: notes.txt, Page: 1"));
    }

    #[test]
    fn long_previews_are_truncated_on_char_boundaries() {
        let long_text = "é".repeat(400);
        let mut engine = engine(vec![hit(&long_text, 0.1)]);
        let out = engine.recall("query", 5, true).unwrap();
        assert!(out.contains('…'));
        assert!(!out.contains(&"é".repeat(301)));
    }

    #[test]
    fn forget_source_delegates_and_clears_cache() {
        let mut engine = engine(vec![hit("a stored fact", 0.2)]);
        engine.recall("query", 5, true).unwrap();
        engine.forget_source("notes.txt").unwrap();

        let after = engine.recall("query", 5, true).unwrap();
        assert!(!after.starts_with("[CACHE HIT]"));
    }

    #[test]
    fn status_reports_counts() {
        let mut engine = engine(vec![]);
        engine.add_memory("remember this").unwrap();
        let status = engine.status().unwrap();
        assert_eq!(status.long_term_count, 1);
        assert_eq!(status.short_term_count, 1);
        assert_eq!(status.cache_max, 512);
    }
}
