//! Local memory layer for AI agents.
//!
//! Text from the web, local files, or direct input is chunked with sentence
//! awareness, embedded locally via ONNX, and stored in SQLite with vector
//! search. Retrieval runs a distance-filtered nearest-neighbor search with
//! deduplication and reranking, fronted by an LRU semantic cache.

pub mod brain;
pub mod cache;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod embedding;
pub mod loader;
pub mod store;
