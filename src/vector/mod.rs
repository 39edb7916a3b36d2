//! Vector index (C3): cosine-space ANN over chunks and over trope
//! definitions, with per-collection metadata filtering.
//!
//! Grounded on `storage/sqlite_vec.rs::SqliteVecStore`, whose `VectorStore`
//! trait partitions a single vec0 table by `context_id`. Here the partition
//! key is a collection name instead of a context, and a `work_id` metadata
//! column rides alongside each chunk vector so the global chunk-collection
//! layout can filter by work without a separate table per work (§4.3).

pub mod sqlite_vec;

#[cfg(feature = "vector-index")]
pub use sqlite_vec::SqliteVecIndex;

use crate::error::VectorIndexError;

/// A single upserted/returned vector entry: its id, optional document text,
/// and optional metadata (currently just `work_id`, used for the global
/// chunk-collection layout's filter).
#[derive(Debug, Clone)]
pub struct VecEntry {
    pub id: String,
    pub document: Option<String>,
    pub work_id: Option<i64>,
}

/// One ranked hit from a `query` call.
#[derive(Debug, Clone)]
pub struct VecHit {
    pub id: String,
    pub document: Option<String>,
    /// Cosine similarity, already converted from distance and clamped to
    /// `[0, 1]` per §4.3.
    pub similarity: f32,
}

/// Cosine-space ANN with named collections, mirroring the Chroma-shaped
/// interface named in §6: `get_or_create_collection`, `upsert`, `query`,
/// `get`, `count`.
pub trait VectorIndex: Send + Sync {
    /// Ensure a collection named `name` exists with the given vector
    /// dimensionality, creating it on first use. Idempotent.
    fn get_or_create_collection(&self, name: &str, dim: usize) -> Result<(), VectorIndexError>;

    /// Replace-upsert `(id, vector, document?, work_id?)` in `collection`.
    /// `ids`, `embeddings`, `documents`, and `work_ids` are parallel arrays.
    fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        embeddings: &[Vec<f32>],
        documents: &[Option<String>],
        work_ids: &[Option<i64>],
    ) -> Result<(), VectorIndexError>;

    /// Top-`n_results` nearest neighbors to `query_embedding` in
    /// `collection`, optionally filtered to a single `work_id`.
    fn query(
        &self,
        collection: &str,
        query_embedding: &[f32],
        n_results: usize,
        work_id_filter: Option<i64>,
    ) -> Result<Vec<VecHit>, VectorIndexError>;

    /// Fetch up to `limit` entries from `collection` (no particular order
    /// guaranteed), used for sanity-check introspection.
    fn get(&self, collection: &str, limit: usize) -> Result<Vec<VecEntry>, VectorIndexError>;

    /// Number of entries currently stored in `collection`.
    fn count(&self, collection: &str) -> Result<usize, VectorIndexError>;
}

/// Name of the per-work chunk collection for a given work, used when
/// `ChunkCollectionLayout::PerWork` is configured (§4.3).
pub fn per_work_collection_name(base: &str, work_id: i64) -> String {
    format!("{base}__{work_id}")
}
