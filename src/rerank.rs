//! Rerank & sanity (C6): per-scene support selection and lexical/semantic
//! trope priors.
//!
//! Grounded on the reasoner's tolerant-JSON-extraction contract (§4.6,
//! §4.7) and on `analysis/orchestrator.rs`'s "log error but continue"
//! pattern — a reasoner failure here falls back to the stage-1 ranking
//! rather than aborting the scene.

use crate::catalog::Trope;
use crate::config::Config;
use crate::embedding::cosine_similarity;
use crate::gazetteer::normalize_phrase;
use crate::reasoner::Reasoner;
use crate::text::{ChunkId, TropeId};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

/// One stage-1 hit, carrying everything the stage-2 prompt needs.
#[derive(Debug, Clone)]
pub struct SupportHit {
    pub chunk_id: ChunkId,
    pub text: String,
    pub stage1_score: f32,
}

/// Outcome of stage-1 + stage-2 support selection for one scene.
#[derive(Debug, Clone)]
pub struct SupportSelection {
    pub chosen: Vec<ChosenSupport>,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct ChosenSupport {
    pub chunk_id: ChunkId,
    pub rank: usize,
    pub stage1_score: f32,
    pub stage2_score: f32,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    support_ids: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    notes: String,
}

/// Stage-2: ask the reasoner which `keep_m` of `hits` best support the
/// scene. Falls back to the top-M by stage-1 score if the reasoner's
/// output is missing or unparseable.
pub async fn select_support(
    scene_text: &str,
    hits: &[SupportHit],
    reasoner: &dyn Reasoner,
    cfg: &Config,
) -> SupportSelection {
    if hits.is_empty() {
        return SupportSelection {
            chosen: Vec::new(),
            notes: "fallback=knn".to_string(),
        };
    }

    let prompt = build_rerank_prompt(scene_text, hits, cfg);
    let response = reasoner.complete(&prompt, Some(RERANK_SYSTEM), 0.0).await;

    let parsed = match response {
        Ok(text) => parse_rerank_response(&text),
        Err(_) => None,
    };

    match parsed {
        Some(ids) if !ids.is_empty() => {
            let known: HashMap<String, &SupportHit> =
                hits.iter().map(|h| (h.chunk_id.get().to_string(), h)).collect();
            let kept: Vec<&SupportHit> = ids
                .iter()
                .filter_map(|id| known.get(id).copied())
                .take(cfg.rerank_keep_m)
                .collect();
            if kept.is_empty() {
                fallback_selection(hits, cfg)
            } else {
                let m = kept.len();
                let chosen = kept
                    .into_iter()
                    .enumerate()
                    .map(|(i, h)| ChosenSupport {
                        chunk_id: h.chunk_id,
                        rank: i + 1,
                        stage1_score: h.stage1_score,
                        stage2_score: (m - i) as f32 / m as f32,
                    })
                    .collect();
                SupportSelection {
                    chosen,
                    notes: String::new(),
                }
            }
        }
        _ => fallback_selection(hits, cfg),
    }
}

fn fallback_selection(hits: &[SupportHit], cfg: &Config) -> SupportSelection {
    let mut ranked: Vec<&SupportHit> = hits.iter().collect();
    ranked.sort_by(|a, b| b.stage1_score.partial_cmp(&a.stage1_score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(cfg.rerank_keep_m);
    let m = ranked.len().max(1);
    let chosen = ranked
        .into_iter()
        .enumerate()
        .map(|(i, h)| ChosenSupport {
            chunk_id: h.chunk_id,
            rank: i + 1,
            stage1_score: h.stage1_score,
            stage2_score: (m - i) as f32 / m as f32,
        })
        .collect();
    SupportSelection {
        chosen,
        notes: "fallback=knn".to_string(),
    }
}

const RERANK_SYSTEM: &str = "You are a precise literary analysis assistant. Respond with strict JSON only.";

fn build_rerank_prompt(scene_text: &str, hits: &[SupportHit], cfg: &Config) -> String {
    let scene_slice = truncate_chars(scene_text, 2_500);
    let items: Vec<String> = hits
        .iter()
        .map(|h| {
            let snippet = truncate_chars(&h.text, cfg.rerank_doc_char_max);
            format!(
                "{{\"id\":\"{}\",\"knn\":{:.4},\"len\":{},\"snippet\":{}}}",
                h.chunk_id.get(),
                h.stage1_score,
                h.text.chars().count(),
                serde_json::to_string(&snippet).unwrap_or_default()
            )
        })
        .collect();

    format!(
        "Scene:\n{scene_slice}\n\nCandidate support snippets:\n[{}]\n\nPick the {} snippets that best support understanding this scene. Respond with strict JSON: {{\"support_ids\": [...], \"notes\": \"...\"}}.",
        items.join(","),
        cfg.rerank_keep_m,
    )
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Parse the reasoner's rerank output: direct JSON object, then a fenced
/// ```json block, then give up.
fn parse_rerank_response(text: &str) -> Option<Vec<String>> {
    if let Ok(parsed) = serde_json::from_str::<RerankResponse>(text) {
        return Some(parsed.support_ids);
    }
    let fenced_re = Regex::new(r"```json\s*([\s\S]*?)```").ok()?;
    if let Some(caps) = fenced_re.captures(text) {
        if let Ok(parsed) = serde_json::from_str::<RerankResponse>(&caps[1]) {
            return Some(parsed.support_ids);
        }
    }
    None
}

/// Sanity prior for one candidate trope in a scene (§4.6 step 3).
#[derive(Debug, Clone)]
pub struct TropeSanity {
    pub trope_id: TropeId,
    pub lex_ok: bool,
    pub sem_sim: f32,
    pub weight: f32,
}

/// A single-token phrase needs word boundaries ("war" must not match inside
/// "warrior"); a multi-word phrase is distinctive enough that plain
/// substring containment is fine. `regex` has no lookaround, so the boundary
/// is modeled the same way `gazetteer::AliasMatcher` does: a leading/trailing
/// non-word capture group instead of `\b`.
fn phrase_matches(phrase: &str, scene_lower: &str, support_lower: &str) -> bool {
    if phrase.contains(' ') {
        return scene_lower.contains(phrase) || support_lower.contains(phrase);
    }
    let pattern = format!(r"(?:^|[^\w]){}(?:$|[^\w])", regex::escape(phrase));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(scene_lower) || re.is_match(support_lower),
        Err(_) => scene_lower.contains(phrase) || support_lower.contains(phrase),
    }
}

/// Compute lexical/semantic priors for each candidate trope, given the
/// scene text, the joined support text, and one embedding per trope
/// (already batched by the caller alongside scene/support embeddings).
pub fn compute_sanity(
    scene_text: &str,
    support_joined: &str,
    scene_vec: &[f32],
    support_vec: &[f32],
    tropes: &[(&Trope, Vec<f32>)],
    cfg: &Config,
) -> Vec<TropeSanity> {
    let scene_lower = scene_text.to_lowercase();
    let support_lower = support_joined.to_lowercase();

    tropes
        .iter()
        .map(|(trope, trope_vec)| {
            let phrases: Vec<String> = std::iter::once(trope.name.clone())
                .chain(trope.aliases.iter().cloned())
                .map(|p| normalize_phrase(&p))
                .filter(|p| !p.is_empty())
                .collect();

            let lex_ok = phrases.iter().any(|p| phrase_matches(p, &scene_lower, &support_lower));

            let sem_sim = cosine_similarity(scene_vec, trope_vec).max(cosine_similarity(support_vec, trope_vec));

            let weight = if lex_ok || sem_sim >= cfg.sem_sim_threshold {
                1.0
            } else {
                cfg.downweight_no_mention
            };

            TropeSanity {
                trope_id: trope.id,
                lex_ok,
                sem_sim,
                weight,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::{GarbageReasoner, MockReasoner};
    use crate::text::TropeId;

    fn hit(id: i64, score: f32) -> SupportHit {
        SupportHit {
            chunk_id: ChunkId::from(id),
            text: format!("chunk text {id}"),
            stage1_score: score,
        }
    }

    #[tokio::test]
    async fn select_support_uses_reasoner_order_when_valid() {
        let hits = vec![hit(1, 0.5), hit(2, 0.9), hit(3, 0.3)];
        let reasoner = MockReasoner::new().with_default(r#"{"support_ids": ["2", "1"], "notes": "ok"}"#);
        let mut cfg = Config::default();
        cfg.rerank_keep_m = 2;
        let sel = select_support("scene text", &hits, &reasoner, &cfg).await;
        assert_eq!(sel.chosen.len(), 2);
        assert_eq!(sel.chosen[0].chunk_id, ChunkId::from(2));
        assert_eq!(sel.chosen[0].rank, 1);
        assert!((sel.chosen[0].stage2_score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn select_support_falls_back_on_garbage_reasoner_output() {
        let hits = vec![hit(1, 0.4), hit(2, 0.9)];
        let reasoner = GarbageReasoner;
        let mut cfg = Config::default();
        cfg.rerank_keep_m = 1;
        let sel = select_support("scene text", &hits, &reasoner, &cfg).await;
        assert_eq!(sel.notes, "fallback=knn");
        assert_eq!(sel.chosen.len(), 1);
        assert_eq!(sel.chosen[0].chunk_id, ChunkId::from(2));
    }

    #[tokio::test]
    async fn select_support_on_empty_hits_is_empty_fallback() {
        let reasoner = MockReasoner::new();
        let cfg = Config::default();
        let sel = select_support("scene", &[], &reasoner, &cfg).await;
        assert!(sel.chosen.is_empty());
        assert_eq!(sel.notes, "fallback=knn");
    }

    #[test]
    fn compute_sanity_marks_lexical_hit() {
        let trope = Trope {
            id: TropeId::from(5),
            name: "Chosen One".to_string(),
            summary: String::new(),
            aliases: vec![],
            anti_aliases: vec![],
        };
        let cfg = Config::default();
        let sanity = compute_sanity(
            "The chosen one walked in.",
            "",
            &[1.0, 0.0],
            &[0.0, 0.0],
            &[(&trope, vec![0.0, 1.0])],
            &cfg,
        );
        assert!(sanity[0].lex_ok);
        assert_eq!(sanity[0].weight, 1.0);
    }

    #[test]
    fn compute_sanity_single_token_alias_does_not_match_inside_longer_word() {
        let trope = Trope {
            id: TropeId::from(5),
            name: "War".to_string(),
            summary: String::new(),
            aliases: vec![],
            anti_aliases: vec![],
        };
        let cfg = Config::default();
        let sanity = compute_sanity(
            "The warrior felt the warmth of the warden's hall.",
            "",
            &[1.0, 0.0],
            &[0.0, 0.0],
            &[(&trope, vec![0.0, 1.0])],
            &cfg,
        );
        assert!(!sanity[0].lex_ok);
    }

    #[test]
    fn compute_sanity_multi_word_phrase_still_matches_as_substring() {
        let trope = Trope {
            id: TropeId::from(5),
            name: "Chosen One".to_string(),
            summary: String::new(),
            aliases: vec![],
            anti_aliases: vec![],
        };
        let cfg = Config::default();
        let sanity = compute_sanity(
            "prechosen oneish talk",
            "",
            &[1.0, 0.0],
            &[0.0, 0.0],
            &[(&trope, vec![0.0, 1.0])],
            &cfg,
        );
        assert!(sanity[0].lex_ok);
    }

    #[test]
    fn compute_sanity_downweights_when_no_signal() {
        let trope = Trope {
            id: TropeId::from(5),
            name: "Unrelated Trope".to_string(),
            summary: String::new(),
            aliases: vec![],
            anti_aliases: vec![],
        };
        let cfg = Config::default();
        let sanity = compute_sanity(
            "Nothing relevant here.",
            "",
            &[1.0, 0.0],
            &[0.0, 0.0],
            &[(&trope, vec![0.0, 1.0])],
            &cfg,
        );
        assert!(!sanity[0].lex_ok);
        assert_eq!(sanity[0].weight, cfg.downweight_no_mention);
    }
}
