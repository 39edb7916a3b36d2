//! Explicit pipeline configuration (Design Note: "Global configuration").
//!
//! The reranker and judge read configuration once, at program entry, into
//! this struct rather than re-reading the environment on every scene.
//! `Config::from_env()` is the only place `std::env::var` is called;
//! everywhere else a `&Config` is threaded through explicitly, the way
//! `analysis/orchestrator.rs::AnalysisOrchestrator` is built once and handed
//! to every analyzer call.

use std::env;

/// Which vector-index layout to use for the chunk collection (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkCollectionLayout {
    /// One collection, metadata-filtered by `work_id`.
    Global,
    /// One collection per work, named `<base>__<work_id>`.
    PerWork,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ollama_base_url: String,
    pub reasoner_model: String,
    pub embed_model: String,

    pub chunk_collection: String,
    pub trope_collection: String,
    pub chunk_collection_layout: ChunkCollectionLayout,

    /// C6 stage-1 retrieval depth (K).
    pub rerank_top_k: usize,
    /// C6 stage-2 kept support count (M).
    pub rerank_keep_m: usize,
    /// Per-snippet truncation budget fed to the reranker prompt (D).
    pub rerank_doc_char_max: usize,

    /// C6 prior weight applied when neither lexical nor semantic signal fires.
    pub downweight_no_mention: f32,
    /// C6 semantic-prior acceptance threshold (θ).
    pub sem_sim_threshold: f32,

    /// C5 semantic-seeder similarity floor (τ).
    pub sem_tau: f32,
    /// C5 top-N hits considered per trope.
    pub sem_top_n: usize,
    /// C5 per-(trope, scene) candidate cap.
    pub sem_per_scene_cap: usize,

    /// C4 near-window half-width for soft anti-alias suppression.
    pub anti_window: usize,
    /// C4 safety cap on gazetteer hits per trope per work.
    pub max_per_trope: usize,
    /// C4 minimum alias length before it's dropped as noise.
    pub alias_min_len: usize,

    /// C7 confidence floor after prior application.
    pub threshold: f32,

    /// C8 span-snap sentence-expansion radius (±k sentences).
    pub verifier_expand_sentences: usize,
    /// C8 center-capped candidate window size.
    pub verifier_max_chars: usize,
    /// C8 score-mixing weight between trope-text and scene-text similarity.
    pub verifier_alpha: f32,
    /// C8 minimum score gain required to adopt a snapped span.
    pub verifier_min_gain: f32,
    /// C8 negation/meta-cue window half-width.
    pub verifier_cue_window: usize,
    pub verifier_policy: VerifierPolicy,
    pub verifier_negation_factor: f32,
    pub verifier_meta_factor: f32,
    pub verifier_anti_factor: f32,

    /// Chunker target/min/max token counts and overlap (§4.1).
    pub chunk_target_tokens: usize,
    pub chunk_min_tokens: usize,
    pub chunk_max_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub chunk_extend_tokens: usize,

    /// Timeouts (milliseconds), spec §5 defaults.
    pub embed_timeout_ms: u64,
    pub reasoner_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierPolicy {
    FlagOnly,
    Downweight,
    Delete,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://127.0.0.1:11434".to_string(),
            reasoner_model: "llama3.1:8b".to_string(),
            embed_model: "nomic-embed-text".to_string(),

            chunk_collection: "trope-miner-v1-cos".to_string(),
            trope_collection: "trope-defs-v1-cos".to_string(),
            chunk_collection_layout: ChunkCollectionLayout::Global,

            rerank_top_k: 8,
            rerank_keep_m: 3,
            rerank_doc_char_max: 480,

            downweight_no_mention: 0.55,
            sem_sim_threshold: 0.36,

            sem_tau: 0.70,
            sem_top_n: 10,
            sem_per_scene_cap: 3,

            anti_window: 60,
            max_per_trope: 200,
            alias_min_len: 5,

            threshold: 0.25,

            verifier_expand_sentences: 2,
            verifier_max_chars: 280,
            verifier_alpha: 0.7,
            verifier_min_gain: 0.05,
            verifier_cue_window: 40,
            verifier_policy: VerifierPolicy::FlagOnly,
            verifier_negation_factor: 0.6,
            verifier_meta_factor: 0.75,
            verifier_anti_factor: 0.5,

            chunk_target_tokens: 450,
            chunk_min_tokens: 300,
            chunk_max_tokens: 600,
            chunk_overlap_tokens: 80,
            chunk_extend_tokens: 30,

            embed_timeout_ms: 120_000,
            reasoner_timeout_ms: 180_000,
        }
    }
}

impl Config {
    /// Build configuration from environment variables, falling back to the
    /// documented defaults for anything unset. This is the only place the
    /// environment is consulted; callers pass the resulting `Config` by
    /// reference from here on.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("OLLAMA_BASE_URL") {
            cfg.ollama_base_url = v;
        }
        if let Ok(v) = env::var("REASONER_MODEL") {
            cfg.reasoner_model = v;
        }
        if let Ok(v) = env::var("EMBED_MODEL") {
            cfg.embed_model = v;
        }
        if let Ok(v) = env::var("CHUNK_COLLECTION") {
            cfg.chunk_collection = v;
        }
        if let Ok(v) = env::var("TROPE_COLLECTION") {
            cfg.trope_collection = v;
        }
        if let Ok(v) = env::var("PER_WORK_COLLECTIONS") {
            cfg.chunk_collection_layout = if v == "1" {
                ChunkCollectionLayout::PerWork
            } else {
                ChunkCollectionLayout::Global
            };
        }
        set_usize(&mut cfg.rerank_top_k, "RERANK_TOP_K");
        set_usize(&mut cfg.rerank_keep_m, "RERANK_KEEP_M");
        set_usize(&mut cfg.rerank_doc_char_max, "RERANK_DOC_CHAR_MAX");
        set_f32(&mut cfg.downweight_no_mention, "DOWNWEIGHT_NO_MENTION");
        set_f32(&mut cfg.sem_sim_threshold, "SEM_SIM_THRESHOLD");
        set_f32(&mut cfg.sem_tau, "SEM_TAU");
        set_usize(&mut cfg.sem_top_n, "SEM_TOP_N");
        set_usize(&mut cfg.sem_per_scene_cap, "SEM_PER_SCENE_CAP");
        set_usize(&mut cfg.anti_window, "ANTI_WINDOW");
        set_f32(&mut cfg.threshold, "THRESHOLD");

        cfg
    }

    /// Validate threshold-shaped fields are within `[0, 1]`.
    pub fn validate(&self) -> Result<(), crate::error::PolicyError> {
        for t in [
            self.downweight_no_mention,
            self.sem_sim_threshold,
            self.sem_tau,
            self.threshold,
            self.verifier_alpha,
        ] {
            if !(0.0..=1.0).contains(&t) {
                return Err(crate::error::PolicyError::ThresholdOutOfRange(t));
            }
        }
        Ok(())
    }
}

fn set_usize(field: &mut usize, var: &str) {
    if let Ok(v) = env::var(var) {
        if let Ok(parsed) = v.parse() {
            *field = parsed;
        }
    }
}

fn set_f32(field: &mut f32, var: &str) {
    if let Ok(v) = env::var(var) {
        if let Ok(parsed) = v.parse() {
            *field = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_threshold_fails_validation() {
        let mut cfg = Config::default();
        cfg.threshold = 1.5;
        assert!(cfg.validate().is_err());
    }
}
