//! Persistent store trait (§3, §6): the relational side of the pipeline.
//! The vector index (`crate::vector`) is authoritative for vectors; this
//! trait is authoritative for findings, spans, and bookkeeping.
//!
//! Grounded on `storage/traits.rs::GraphStore` — a thread-safe
//! (`Send + Sync`) trait of CRUD operations plus an `OpenStore` extension
//! for path/in-memory construction — generalized from a graph schema to the
//! Work/Chapter/Scene/Chunk/Trope/Candidate/Finding schema of §3.

use crate::candidate::TropeCandidate;
use crate::catalog::Trope;
use crate::error::Result;
use crate::text::{Chapter, ChapterId, Chunk, ChunkId, FindingId, Scene, SceneId, TropeId, Work, WorkId};
use std::path::Path;

/// `EmbeddingRef {chunk_id, collection, model, dim, vector_id}`, PK
/// `(chunk_id, collection)`.
#[derive(Debug, Clone)]
pub struct EmbeddingRef {
    pub chunk_id: ChunkId,
    pub collection: String,
    pub model: String,
    pub dim: usize,
    pub vector_id: String,
}

/// `SceneSupport {scene_id PK, support_ids[], notes, model, k, m, created_at}`.
#[derive(Debug, Clone)]
pub struct SceneSupport {
    pub scene_id: SceneId,
    pub support_ids: Vec<ChunkId>,
    pub notes: String,
    pub model: String,
    pub k: usize,
    pub m: usize,
}

/// `SupportSelection {scene_id, chunk_id, rank, stage1_score, stage2_score, picked}`.
#[derive(Debug, Clone)]
pub struct SupportSelectionRow {
    pub scene_id: SceneId,
    pub chunk_id: ChunkId,
    pub rank: usize,
    pub stage1_score: f32,
    pub stage2_score: f32,
    pub picked: bool,
}

/// `TropeSanity {scene_id, trope_id, lex_ok, sem_sim, weight}`.
#[derive(Debug, Clone)]
pub struct TropeSanityRow {
    pub scene_id: SceneId,
    pub trope_id: TropeId,
    pub lex_ok: bool,
    pub sem_sim: f32,
    pub weight: f32,
}

/// `TropeFinding {id, work_id, scene_id, trope_id, level, confidence,
/// evidence_start, evidence_end, rationale, model, verifier_score?,
/// verifier_flag?, created_at}`.
#[derive(Debug, Clone)]
pub struct TropeFinding {
    pub id: FindingId,
    pub work_id: WorkId,
    pub scene_id: SceneId,
    pub trope_id: TropeId,
    pub level: Option<String>,
    pub confidence: f32,
    pub evidence_start: usize,
    pub evidence_end: usize,
    pub rationale: String,
    pub model: String,
    pub verifier_score: Option<f32>,
    pub verifier_flag: Option<String>,
}

/// The relational store for the whole pipeline. Implementations must be
/// `Send + Sync` to support the per-scene tokio tasks in the orchestrator.
pub trait TropeStore: Send + Sync {
    // --- Work / Chapter / Scene / Chunk -------------------------------
    fn create_work(&self, title: &str, author: Option<&str>, raw_text: &str, norm_text: &str) -> Result<Work>;
    fn get_work(&self, id: WorkId) -> Result<Option<Work>>;

    fn insert_chapters(&self, work_id: WorkId, chapters: &[(usize, Option<String>, usize, usize)]) -> Result<Vec<Chapter>>;
    fn get_chapters(&self, work_id: WorkId) -> Result<Vec<Chapter>>;

    fn insert_scenes(
        &self,
        work_id: WorkId,
        chapter_id: Option<ChapterId>,
        scenes: &[(usize, usize, usize, Option<String>)],
    ) -> Result<Vec<Scene>>;
    fn get_scenes(&self, work_id: WorkId) -> Result<Vec<Scene>>;

    /// Insert chunks for a scene, deduplicating by `sha256` (the unique
    /// index makes re-running idempotent — an existing chunk with the same
    /// hash is returned rather than duplicated).
    fn insert_chunks(&self, work_id: WorkId, scene_id: SceneId, chunks: &[Chunk]) -> Result<Vec<Chunk>>;
    fn get_chunks_for_scene(&self, scene_id: SceneId) -> Result<Vec<Chunk>>;

    // --- Trope catalog --------------------------------------------------
    fn upsert_trope(&self, trope: &Trope) -> Result<()>;
    fn get_trope(&self, id: TropeId) -> Result<Option<Trope>>;
    fn list_tropes(&self) -> Result<Vec<Trope>>;

    // --- Embedding refs ---------------------------------------------------
    fn upsert_embedding_ref(&self, r: &EmbeddingRef) -> Result<()>;
    fn get_embedding_ref(&self, chunk_id: ChunkId, collection: &str) -> Result<Option<EmbeddingRef>>;

    // --- Candidates -------------------------------------------------------
    /// Insert a candidate, respecting the unique `(work_id, trope_id, start,
    /// end)` constraint; a duplicate insert is a silent no-op (idempotence).
    fn insert_candidate(&self, candidate: &TropeCandidate) -> Result<()>;
    fn get_candidates_for_scene(&self, scene_id: SceneId) -> Result<Vec<TropeCandidate>>;

    // --- Rerank & sanity ----------------------------------------------------
    fn upsert_scene_support(&self, row: &SceneSupport) -> Result<()>;
    fn upsert_support_selection(&self, row: &SupportSelectionRow) -> Result<()>;
    fn upsert_trope_sanity(&self, row: &TropeSanityRow) -> Result<()>;

    // --- Findings -----------------------------------------------------------
    /// Insert or update a finding keyed by `(work_id, trope_id,
    /// evidence_start, evidence_end)`. Confidence is clamped to `[0, 1]`
    /// before the write.
    fn upsert_finding(&self, finding: &TropeFinding) -> Result<FindingId>;
    fn get_findings_for_scene(&self, scene_id: SceneId) -> Result<Vec<TropeFinding>>;
    fn update_finding_verifier(
        &self,
        id: FindingId,
        evidence_start: usize,
        evidence_end: usize,
        confidence: f32,
        verifier_score: f32,
        verifier_flag: Option<&str>,
    ) -> Result<()>;
    fn delete_finding(&self, id: FindingId) -> Result<()>;

    /// `true` if the installed schema carries the optional `anti_aliases`
    /// column on `tropes` (§7: optional tables/columns degrade silently).
    fn has_anti_aliases_column(&self) -> bool;
    /// `true` if the installed schema carries the optional `level` column
    /// on `trope_finding`.
    fn has_level_column(&self) -> bool;
}

/// Extension trait for opening stores from a path or in memory, mirroring
/// `storage/traits.rs::OpenStore`.
pub trait OpenTropeStore: TropeStore + Sized {
    fn open(path: impl AsRef<Path>) -> Result<Self>;
    fn open_in_memory() -> Result<Self>;
}
