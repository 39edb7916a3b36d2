//! Semantic seeder (C5): per-trope similarity search against the chunk
//! collection, emitting candidates where the gazetteer found nothing.
//!
//! Grounded on `adapter/embedding.rs`'s embed-then-search pattern, replacing
//! the teacher's single fixed threshold with the configurable `(τ, top_n,
//! per_scene_cap)` triple from §4.5.

use crate::candidate::{CandidateSource, TropeCandidate};
use crate::catalog::Trope;
use crate::config::{ChunkCollectionLayout, Config};
use crate::embedding::Embedder;
use crate::error::{EmbedError, VectorIndexError};
use crate::text::{ChunkId, SceneId, WorkId};
use crate::vector::{per_work_collection_name, VectorIndex};
use std::collections::HashMap;

/// Chunk identity needed to map a vector-index hit id back to a row: the
/// vector id convention is `"{chunk_id}"`.
pub struct ChunkLookup {
    /// chunk_id -> (scene_id, char_start)
    pub by_id: HashMap<i64, (SceneId, usize)>,
}

/// Seed semantic candidates for one trope against one work's chunk
/// collection. Chunk spans in the returned candidates are the whole
/// chunk's `(char_start, char_end)` per §4.5, looked up via `lookup`.
pub async fn seed_trope(
    trope: &Trope,
    work_id: WorkId,
    lookup: &ChunkLookup,
    chunk_ends: &HashMap<i64, usize>,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    cfg: &Config,
) -> Result<Vec<TropeCandidate>, EmbedError> {
    let doc = trope.embedding_document();
    let vector = embedder.embed_one(&doc).await?;

    let collection = match cfg.chunk_collection_layout {
        ChunkCollectionLayout::Global => cfg.chunk_collection.clone(),
        ChunkCollectionLayout::PerWork => per_work_collection_name(&cfg.chunk_collection, work_id.get()),
    };
    let work_filter = match cfg.chunk_collection_layout {
        ChunkCollectionLayout::Global => Some(work_id.get()),
        ChunkCollectionLayout::PerWork => None,
    };

    let hits = index
        .query(&collection, &vector, cfg.sem_top_n, work_filter)
        .map_err(vector_err_to_embed_err)?;

    let mut per_scene_count: HashMap<i64, usize> = HashMap::new();
    let mut out = Vec::new();

    for hit in hits {
        if hit.similarity < cfg.sem_tau {
            continue;
        }
        let chunk_id: i64 = match hit.id.parse() {
            Ok(id) => id,
            Err(_) => continue,
        };
        let Some((scene_id, char_start)) = lookup.by_id.get(&chunk_id).copied() else {
            continue;
        };
        let Some(char_end) = chunk_ends.get(&chunk_id).copied() else {
            continue;
        };

        let count = per_scene_count.entry(scene_id.get()).or_insert(0);
        if *count >= cfg.sem_per_scene_cap {
            continue;
        }
        *count += 1;

        out.push(TropeCandidate {
            work_id,
            scene_id,
            chunk_id: ChunkId::from(chunk_id),
            trope_id: trope.id,
            surface: None,
            alias: None,
            start: char_start,
            end: char_end,
            source: CandidateSource::Semantic,
            score: hit.similarity,
        });
    }

    Ok(out)
}

fn vector_err_to_embed_err(e: VectorIndexError) -> EmbedError {
    EmbedError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::text::TropeId;
    use crate::vector::sqlite_vec::SqliteVecIndex;

    fn trope() -> Trope {
        Trope {
            id: TropeId::from(9),
            name: "Chosen One".to_string(),
            summary: "A destined hero.".to_string(),
            aliases: vec![],
            anti_aliases: vec![],
        }
    }

    #[tokio::test]
    async fn seeds_kept_hits_above_tau_and_respects_scene_cap() {
        let index = SqliteVecIndex::open_in_memory(3).unwrap();
        index
            .upsert(
                "chunks",
                &["1".to_string(), "2".to_string(), "3".to_string()],
                &[vec![0.9, 0.3, 0.1], vec![0.88, 0.32, 0.12], vec![0.1, 0.2, 0.95]],
                &[None, None, None],
                &[Some(1), Some(1), Some(1)],
            )
            .unwrap();

        let embedder = MockEmbedder::new(3).with("Chosen One. A destined hero.", vec![0.9, 0.3, 0.1]);

        let mut by_id = HashMap::new();
        by_id.insert(1, (SceneId::from(1), 0));
        by_id.insert(2, (SceneId::from(1), 50));
        by_id.insert(3, (SceneId::from(1), 100));
        let lookup = ChunkLookup { by_id };
        let mut ends = HashMap::new();
        ends.insert(1, 40);
        ends.insert(2, 90);
        ends.insert(3, 140);

        let mut cfg = Config::default();
        cfg.sem_tau = 0.7;
        cfg.sem_per_scene_cap = 1;
        cfg.chunk_collection = "chunks".to_string();

        let cands = seed_trope(&trope(), WorkId::from(1), &lookup, &ends, &embedder, &index, &cfg)
            .await
            .unwrap();

        // Both 1 and 2 clear tau, but the per-scene cap of 1 keeps only the
        // first (by similarity rank).
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].chunk_id, ChunkId::from(1));
    }
}
