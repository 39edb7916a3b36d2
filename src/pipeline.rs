//! Pipeline orchestrator: per-work control flow
//! C1 (ingest) -> C2/C3 (embed + index) -> C4+C5 (candidates) -> per-scene
//! {C6 (rerank+sanity) -> C7 (judge) -> C8 (verify)}.
//!
//! Grounded on `analysis/orchestrator.rs::AnalysisOrchestrator`'s
//! semaphore-rate-limited sequential loop over LLM-bearing steps: acquire a
//! permit, run with a timeout, log a warning and continue on failure rather
//! than aborting the whole work. Only store/data errors propagate to the
//! caller; embedder/reasoner/vector-index failures degrade the scene's
//! output (fewer candidates, fallback rerank, no findings) and are logged.

use crate::catalog::Trope;
use crate::config::{ChunkCollectionLayout, Config};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::gazetteer::{build_entry, match_chunk};
use crate::judge::{build_judge_prompt, judge_scene, JudgedFinding};
use crate::reasoner::Reasoner;
use crate::rerank::{compute_sanity, select_support, ChosenSupport, SupportHit, TropeSanity};
use crate::seeder::{seed_trope, ChunkLookup};
use crate::store::{EmbeddingRef, SceneSupport, SupportSelectionRow, TropeFinding, TropeSanityRow, TropeStore};
use crate::text::{decode, normalize_text, segment_work, Chunk, ChunkId, Codec, Scene, SceneId, TropeId, Work, WorkId};
use crate::vector::{per_work_collection_name, VectorIndex};
use crate::verifier::{apply_policy, candidate_windows, choose_best, flag_for, score_candidate};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Wires the pipeline's four backends plus configuration. Construct once
/// per run and reuse across works, mirroring `AnalysisOrchestrator` being
/// built once and handed every analysis scope.
pub struct Pipeline<'a> {
    store: &'a dyn TropeStore,
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    reasoner: &'a dyn Reasoner,
    cfg: &'a Config,
    llm_semaphore: Arc<Semaphore>,
    scene_timeout: Duration,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a dyn TropeStore,
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        reasoner: &'a dyn Reasoner,
        cfg: &'a Config,
    ) -> Self {
        Self::with_llm_concurrency(store, embedder, index, reasoner, cfg, 1)
    }

    /// Build with a specific number of scenes allowed to hold an LLM call
    /// concurrently (§5's "scheduling model" suspension points).
    pub fn with_llm_concurrency(
        store: &'a dyn TropeStore,
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        reasoner: &'a dyn Reasoner,
        cfg: &'a Config,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            index,
            reasoner,
            cfg,
            llm_semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            scene_timeout: Duration::from_millis(cfg.reasoner_timeout_ms.max(cfg.embed_timeout_ms)),
        }
    }

    fn chunk_collection_for(&self, work_id: WorkId) -> String {
        match self.cfg.chunk_collection_layout {
            ChunkCollectionLayout::Global => self.cfg.chunk_collection.clone(),
            ChunkCollectionLayout::PerWork => per_work_collection_name(&self.cfg.chunk_collection, work_id.get()),
        }
    }

    fn chunk_work_filter(&self, work_id: WorkId) -> Option<i64> {
        match self.cfg.chunk_collection_layout {
            ChunkCollectionLayout::Global => Some(work_id.get()),
            ChunkCollectionLayout::PerWork => None,
        }
    }

    /// C1 + C2 + C3: decode/normalize/segment the raw bytes, persist the
    /// chapter/scene/chunk tree, embed every chunk, and upsert it into the
    /// chunk collection (document text carried alongside so stage-1 rerank
    /// doesn't need a second store round-trip).
    pub async fn ingest_work(&self, title: &str, author: Option<&str>, raw_bytes: &[u8], codec: Option<Codec>) -> Result<WorkId> {
        let raw_text = decode(raw_bytes, codec);
        let norm_text = normalize_text(&raw_text);
        let work = self.store.create_work(title, author, &raw_text, &norm_text)?;
        let seg = segment_work(&norm_text, self.cfg);
        let collection = self.chunk_collection_for(work.id);

        let mut flat_scene_idx = 0usize;
        for (chapter_idx, chapter) in seg.chapters.iter().enumerate() {
            let persisted_chapters = self.store.insert_chapters(
                work.id,
                &[(chapter.idx, chapter.title.clone(), chapter.span.start, chapter.span.end)],
            )?;
            let chapter_id = persisted_chapters[0].id;

            for scene in &seg.scenes_by_chapter[chapter_idx] {
                let persisted_scenes = self.store.insert_scenes(
                    work.id,
                    Some(chapter_id),
                    &[(scene.idx, scene.span.start, scene.span.end, scene.heading.clone())],
                )?;
                let scene_row = &persisted_scenes[0];

                let windows = &seg.chunks_by_scene[flat_scene_idx];
                let placeholders: Vec<Chunk> = windows
                    .iter()
                    .map(|w| Chunk {
                        id: ChunkId::from(0),
                        work_id: work.id,
                        scene_id: Some(scene_row.id),
                        idx: w.idx,
                        span: w.span,
                        token_start: w.token_start,
                        token_end: w.token_end,
                        text: w.text.clone(),
                        sha256: w.sha256.clone(),
                    })
                    .collect();
                let persisted_chunks = self.store.insert_chunks(work.id, scene_row.id, &placeholders)?;

                if !persisted_chunks.is_empty() {
                    let texts: Vec<&str> = persisted_chunks.iter().map(|c| c.text.as_str()).collect();
                    let vectors = self.embedder.embed_batch(&texts).await?;
                    let ids: Vec<String> = persisted_chunks.iter().map(|c| c.id.get().to_string()).collect();
                    let documents: Vec<Option<String>> = persisted_chunks.iter().map(|c| Some(c.text.clone())).collect();
                    let work_ids: Vec<Option<i64>> = persisted_chunks.iter().map(|_| Some(work.id.get())).collect();

                    self.index.upsert(&collection, &ids, &vectors, &documents, &work_ids)?;
                    for (chunk, vector) in persisted_chunks.iter().zip(vectors.iter()) {
                        self.store.upsert_embedding_ref(&EmbeddingRef {
                            chunk_id: chunk.id,
                            collection: collection.clone(),
                            model: self.cfg.embed_model.clone(),
                            dim: vector.len(),
                            vector_id: chunk.id.get().to_string(),
                        })?;
                    }
                }

                flat_scene_idx += 1;
            }
        }

        Ok(work.id)
    }

    /// C4 + C5: run the gazetteer over every persisted chunk, then seed
    /// semantic candidates per trope against the chunk collection.
    pub async fn seed_candidates(&self, work_id: WorkId, tropes: &[Trope]) -> Result<()> {
        let scenes = self.store.get_scenes(work_id)?;

        let mut by_id: HashMap<i64, (SceneId, usize)> = HashMap::new();
        let mut chunk_ends: HashMap<i64, usize> = HashMap::new();
        let mut all_chunks: Vec<Chunk> = Vec::new();
        for scene in &scenes {
            for chunk in self.store.get_chunks_for_scene(scene.id)? {
                by_id.insert(chunk.id.get(), (scene.id, chunk.span.start));
                chunk_ends.insert(chunk.id.get(), chunk.span.end);
                all_chunks.push(chunk);
            }
        }
        let lookup = ChunkLookup { by_id };

        for trope in tropes {
            let entry = build_entry(trope, self.cfg);
            let mut emitted = 0usize;
            for chunk in &all_chunks {
                if emitted >= self.cfg.max_per_trope {
                    break;
                }
                let scene_id = chunk.scene_id.expect("chunks fetched via get_chunks_for_scene always carry a scene_id");
                let remaining = self.cfg.max_per_trope - emitted;
                let cands = match_chunk(&entry, work_id, scene_id, chunk.id, &chunk.text, chunk.span.start, self.cfg, remaining);
                emitted += cands.len();
                for c in cands {
                    self.store.insert_candidate(&c)?;
                }
            }
        }

        for trope in tropes {
            match seed_trope(trope, work_id, &lookup, &chunk_ends, self.embedder, self.index, self.cfg).await {
                Ok(cands) => {
                    for c in cands {
                        self.store.insert_candidate(&c)?;
                    }
                }
                Err(e) => {
                    tracing::warn!(trope_id = trope.id.get(), error = %e, "semantic seeding failed, skipping trope for this work");
                }
            }
        }

        Ok(())
    }

    /// Run C6 -> C7 -> C8 over every scene of `work_id`, rate-limited by the
    /// configured LLM concurrency. A scene whose rerank/judge/verify stage
    /// errors or times out is logged and skipped; only store errors abort
    /// the whole work.
    pub async fn mine_work(&self, work_id: WorkId, tropes: &[Trope]) -> Result<()> {
        let work = self.store.get_work(work_id)?.ok_or_else(|| {
            crate::error::TropeMinerError::Data(crate::error::DataError::UnexpectedDuplicate(format!(
                "work {work_id} vanished mid-run"
            )))
        })?;
        let scenes = self.store.get_scenes(work_id)?;

        for scene in scenes {
            let _permit = self
                .llm_semaphore
                .acquire()
                .await
                .expect("semaphore is never closed");

            match tokio::time::timeout(self.scene_timeout, self.mine_scene(&work, &scene, tropes)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    tracing::warn!(scene_id = scene.id.get(), "scene mining timed out, skipping scene");
                }
            }
        }

        Ok(())
    }

    async fn mine_scene(&self, work: &Work, scene: &Scene, tropes: &[Trope]) -> Result<()> {
        let candidates = self.store.get_candidates_for_scene(scene.id)?;
        if candidates.is_empty() {
            return Ok(());
        }
        let candidate_trope_ids: std::collections::HashSet<i64> = candidates.iter().map(|c| c.trope_id.get()).collect();
        let scene_tropes: Vec<&Trope> = tropes.iter().filter(|t| candidate_trope_ids.contains(&t.id.get())).collect();
        if scene_tropes.is_empty() {
            return Ok(());
        }

        let scene_text: String = work.norm_text.chars().skip(scene.span.start).take(scene.span.len()).collect();

        let scene_vec = match self.embedder.embed_one(&scene_text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(scene_id = scene.id.get(), error = %e, "scene embedding failed, skipping scene");
                return Ok(());
            }
        };

        let collection = self.chunk_collection_for(work.id);
        let work_filter = self.chunk_work_filter(work.id);
        let hits = match self.index.query(&collection, &scene_vec, self.cfg.rerank_top_k, work_filter) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(scene_id = scene.id.get(), error = %e, "stage-1 retrieval failed, skipping scene");
                return Ok(());
            }
        };
        let support_hits: Vec<SupportHit> = hits
            .into_iter()
            .filter_map(|h| {
                let chunk_id: i64 = h.id.parse().ok()?;
                Some(SupportHit {
                    chunk_id: ChunkId::from(chunk_id),
                    text: h.document.unwrap_or_default(),
                    stage1_score: h.similarity,
                })
            })
            .collect();

        let selection = select_support(&scene_text, &support_hits, self.reasoner, self.cfg).await;
        self.store.upsert_scene_support(&SceneSupport {
            scene_id: scene.id,
            support_ids: selection.chosen.iter().map(|c| c.chunk_id).collect(),
            notes: selection.notes.clone(),
            model: self.cfg.reasoner_model.clone(),
            k: self.cfg.rerank_top_k,
            m: self.cfg.rerank_keep_m,
        })?;
        for chosen in &selection.chosen {
            self.store.upsert_support_selection(&SupportSelectionRow {
                scene_id: scene.id,
                chunk_id: chosen.chunk_id,
                rank: chosen.rank,
                stage1_score: chosen.stage1_score,
                stage2_score: chosen.stage2_score,
                picked: true,
            })?;
        }

        let support_text_by_id: HashMap<i64, String> = support_hits.iter().map(|h| (h.chunk_id.get(), h.text.clone())).collect();
        let support_pairs: Vec<(ChosenSupport, String)> = selection
            .chosen
            .iter()
            .map(|c| (c.clone(), support_text_by_id.get(&c.chunk_id.get()).cloned().unwrap_or_default()))
            .collect();
        let support_joined = support_pairs.iter().map(|(_, t)| t.as_str()).collect::<Vec<_>>().join("\n");

        let support_vec = if support_joined.is_empty() {
            vec![0.0; scene_vec.len()]
        } else {
            self.embedder.embed_one(&support_joined).await.unwrap_or_else(|_| vec![0.0; scene_vec.len()])
        };

        let mut trope_vecs: Vec<(&Trope, Vec<f32>)> = Vec::with_capacity(scene_tropes.len());
        let mut trope_name_by_id: HashMap<i64, &str> = HashMap::with_capacity(scene_tropes.len());
        for t in &scene_tropes {
            let doc = t.embedding_document();
            let v = self.embedder.embed_one(&doc).await.unwrap_or_else(|_| vec![0.0; scene_vec.len()]);
            trope_vecs.push((*t, v));
            trope_name_by_id.insert(t.id.get(), t.name.as_str());
        }

        let sanity = compute_sanity(&scene_text, &support_joined, &scene_vec, &support_vec, &trope_vecs, self.cfg);
        for s in &sanity {
            self.store.upsert_trope_sanity(&TropeSanityRow {
                scene_id: scene.id,
                trope_id: s.trope_id,
                lex_ok: s.lex_ok,
                sem_sim: s.sem_sim,
                weight: s.weight,
            })?;
        }

        let prompt = build_judge_prompt(&scene_text, scene.span.start, &support_pairs, &scene_tropes, &sanity, self.cfg);
        let whitelist: Vec<TropeId> = scene_tropes.iter().map(|t| t.id).collect();
        let findings = judge_scene(&prompt, self.reasoner, work.char_count, &whitelist, &sanity, self.cfg).await;

        let trope_vec_by_id: HashMap<i64, &Vec<f32>> = trope_vecs.iter().map(|(t, v)| (t.id.get(), v)).collect();

        // C7 persists every judged finding as a durable row before C8 looks
        // at any of them, so the raw judge output survives independently of
        // whether verification later revises or deletes it.
        let mut judged_ids = Vec::with_capacity(findings.len());
        for finding in findings {
            if let Some(id) = self.persist_judged_finding(work, scene, finding).await? {
                judged_ids.push(id);
            }
        }

        if judged_ids.is_empty() {
            return Ok(());
        }

        // C8 reads the rows back from the store rather than consuming C7's
        // in-memory output directly, the way a separate verifier pass would.
        let persisted = self.store.get_findings_for_scene(scene.id)?;
        for row in persisted.into_iter().filter(|r| judged_ids.contains(&r.id)) {
            self.verify_finding(scene, &scene_text, &scene_vec, row, &trope_vec_by_id, &trope_name_by_id).await?;
        }

        Ok(())
    }

    /// C7: persist one judged finding as a raw durable row with the
    /// verifier fields unset. Returns `None` (and persists nothing) if the
    /// judge's span collapses once clamped — never emits an invalid row.
    async fn persist_judged_finding(&self, work: &Work, scene: &Scene, finding: JudgedFinding) -> Result<Option<crate::text::FindingId>> {
        if finding.evidence_end <= finding.evidence_start {
            return Ok(None);
        }
        let raw = TropeFinding {
            id: crate::text::FindingId::from(0),
            work_id: work.id,
            scene_id: scene.id,
            trope_id: finding.trope_id,
            level: None,
            confidence: finding.confidence,
            evidence_start: finding.evidence_start,
            evidence_end: finding.evidence_end,
            rationale: finding.rationale,
            model: self.cfg.reasoner_model.clone(),
            verifier_score: None,
            verifier_flag: None,
        };
        Ok(Some(self.store.upsert_finding(&raw)?))
    }

    /// C8: snap the judged span to sentence boundaries, rescore, flag, and
    /// apply the configured policy against the durable row C7 persisted,
    /// revising it in place via `update_finding_verifier` or removing it via
    /// `delete_finding`.
    async fn verify_finding(
        &self,
        scene: &Scene,
        scene_text: &str,
        scene_vec: &[f32],
        finding: TropeFinding,
        trope_vec_by_id: &HashMap<i64, &Vec<f32>>,
        trope_name_by_id: &HashMap<i64, &str>,
    ) -> Result<()> {
        let Some(&trope_vec) = trope_vec_by_id.get(&finding.trope_id.get()) else {
            return Ok(());
        };

        let rel_start = finding.evidence_start.saturating_sub(scene.span.start).min(scene_text.chars().count());
        let rel_end = finding.evidence_end.saturating_sub(scene.span.start).min(scene_text.chars().count());
        if rel_end <= rel_start {
            self.store.delete_finding(finding.id)?;
            return Ok(());
        }

        let orig_text: String = scene_text.chars().skip(rel_start).take(rel_end - rel_start).collect();
        let orig_vec = self.embedder.embed_one(&orig_text).await.unwrap_or_else(|_| vec![0.0; scene_vec.len()]);
        let orig_score = score_candidate(&orig_vec, trope_vec, scene_vec, self.cfg.verifier_alpha);

        let windows = candidate_windows(scene_text, rel_start, rel_end, self.cfg);
        let mut scored = Vec::with_capacity(windows.len());
        for w in &windows {
            let text: String = scene_text.chars().skip(w.start).take(w.end - w.start).collect();
            let vec = self.embedder.embed_one(&text).await.unwrap_or_else(|_| vec![0.0; scene_vec.len()]);
            let score = score_candidate(&vec, trope_vec, scene_vec, self.cfg.verifier_alpha);
            scored.push((*w, score));
        }

        let best = *choose_best(&scored, orig_score, self.cfg.threshold, self.cfg.verifier_min_gain);
        let best_score = scored.iter().find(|(w, _)| w.start == best.start && w.end == best.end).map(|(_, s)| *s).unwrap_or(orig_score);

        let window_lo = best.start.saturating_sub(self.cfg.verifier_cue_window);
        let window_hi = (best.end + self.cfg.verifier_cue_window).min(scene_text.chars().count());
        let window_text: String = scene_text.chars().skip(window_lo).take(window_hi - window_lo).collect();

        let alias_hint = trope_name_by_id.get(&finding.trope_id.get()).copied();
        let flag = flag_for(&window_text, alias_hint, best_score, self.cfg.threshold);
        let (confidence, delete) = apply_policy(finding.confidence, flag, self.cfg);

        let abs_start = scene.span.start + best.start;
        let abs_end = scene.span.start + best.end;

        if delete {
            self.store.delete_finding(finding.id)?;
        } else {
            self.store.update_finding_verifier(finding.id, abs_start, abs_end, confidence, best_score, flag.map(|f| f.as_str()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::reasoner::MockReasoner;
    use crate::store::SqliteTropeStore;
    use crate::vector::sqlite_vec::SqliteVecIndex;

    fn trope() -> Trope {
        Trope {
            id: TropeId::from(1),
            name: "Chosen One".to_string(),
            summary: "A destined hero.".to_string(),
            aliases: vec!["the chosen".to_string()],
            anti_aliases: vec![],
        }
    }

    #[tokio::test]
    async fn ingest_seed_and_mine_roundtrips_without_error() {
        let store = SqliteTropeStore::open_in_memory().unwrap();
        let index = SqliteVecIndex::open_in_memory(4).unwrap();
        let embedder = MockEmbedder::new(4);
        let reasoner = MockReasoner::new().with_default(r#"[]"#);
        let cfg = Config::default();

        let pipeline = Pipeline::new(&store, &embedder, &index, &reasoner, &cfg);
        let text = b"Chapter 1\nThe chosen one walked quietly into the room, unsure of the days ahead, carrying doubts heavier than any blade.\n";
        let work_id = pipeline.ingest_work("Test Work", None, text, Some(Codec::Utf8)).await.unwrap();

        pipeline.seed_candidates(work_id, std::slice::from_ref(&trope())).await.unwrap();
        pipeline.mine_work(work_id, std::slice::from_ref(&trope())).await.unwrap();

        let scenes = store.get_scenes(work_id).unwrap();
        assert!(!scenes.is_empty());
    }

    #[tokio::test]
    async fn seed_candidates_caps_gazetteer_hits_across_chunks_not_per_chunk() {
        let store = SqliteTropeStore::open_in_memory().unwrap();
        let index = SqliteVecIndex::open_in_memory(4).unwrap();
        let embedder = MockEmbedder::new(4);
        let reasoner = MockReasoner::new();
        let mut cfg = Config::default();
        cfg.max_per_trope = 3;

        let work = store.create_work("Title", None, "raw", "norm").unwrap();
        let scenes = store.insert_scenes(work.id, None, &[(0, 0, 100, None)]).unwrap();

        // Three chunks, each with 5 gazetteer hits; a per-chunk cap of 3
        // would wrongly allow 9 total. The cumulative cap must allow only 3.
        for i in 0..3 {
            let chunk = Chunk {
                id: ChunkId::from(0),
                work_id: work.id,
                scene_id: Some(scenes[0].id),
                idx: i,
                span: crate::text::Span { start: i * 20, end: i * 20 + 19 },
                token_start: 0,
                token_end: 5,
                text: "one one one one one".to_string(),
                sha256: format!("fake-hash-{i}"),
            };
            store.insert_chunks(work.id, scenes[0].id, std::slice::from_ref(&chunk)).unwrap();
        }

        let pipeline = Pipeline::new(&store, &embedder, &index, &reasoner, &cfg);
        let t = Trope { id: TropeId::from(1), name: "One".to_string(), summary: String::new(), aliases: vec![], anti_aliases: vec![] };
        pipeline.seed_candidates(work.id, std::slice::from_ref(&t)).await.unwrap();

        let candidates = store.get_candidates_for_scene(scenes[0].id).unwrap();
        let gazetteer_hits = candidates.iter().filter(|c| c.source == crate::candidate::CandidateSource::Gazetteer).count();
        assert_eq!(gazetteer_hits, cfg.max_per_trope);
    }

    #[tokio::test]
    async fn mine_work_persists_a_finding_carrying_a_verifier_score() {
        let store = SqliteTropeStore::open_in_memory().unwrap();
        let index = SqliteVecIndex::open_in_memory(4).unwrap();
        let embedder = MockEmbedder::new(4);
        let text = b"Chapter 1\nThe chosen one walked quietly into the room, unsure of the days ahead, carrying doubts heavier than any blade.\n";

        let cfg = Config::default();
        let reasoner = MockReasoner::new()
            .with_default(r#"[{"trope_id": 1, "confidence": 0.9, "evidence_char_span": [10, 30], "rationale": "clear evidence"}]"#);

        let pipeline = Pipeline::new(&store, &embedder, &index, &reasoner, &cfg);
        let work_id = pipeline.ingest_work("Test Work", None, text, Some(Codec::Utf8)).await.unwrap();
        pipeline.seed_candidates(work_id, std::slice::from_ref(&trope())).await.unwrap();
        pipeline.mine_work(work_id, std::slice::from_ref(&trope())).await.unwrap();

        let scenes = store.get_scenes(work_id).unwrap();
        let findings = store.get_findings_for_scene(scenes[0].id).unwrap();
        assert_eq!(findings.len(), 1);
        // C8 ran against the durable row C7 persisted, so verifier_score is set.
        assert!(findings[0].verifier_score.is_some());
    }
}
