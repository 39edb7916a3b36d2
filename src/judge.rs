//! Scene judge (C7): prompt a reasoner with a scene, its chosen support,
//! and candidate trope definitions annotated with C6's priors; parse
//! findings; apply the prior to confidence and clamp spans.
//!
//! Grounded on the three-step JSON recognizer the reasoner contract
//! requires across the pipeline (direct parse, fenced block, bracketed
//! substring) — first introduced in `rerank.rs`, completed here with the
//! bracketed-substring fallback since the judge's output is an array, not
//! an object.

use crate::catalog::Trope;
use crate::config::Config;
use crate::rerank::{ChosenSupport, TropeSanity};
use crate::reasoner::Reasoner;
use crate::text::TropeId;
use regex::Regex;
use serde::Deserialize;

const JUDGE_SYSTEM: &str =
    "You are precise, conservative, and evidence-based. Only report tropes you can point to direct textual evidence for.";

#[derive(Debug, Deserialize)]
struct RawFinding {
    trope_id: i64,
    confidence: f32,
    evidence_char_span: (i64, i64),
    rationale: String,
}

/// One accepted judgment, ready for persistence as a `TropeFinding` row.
#[derive(Debug, Clone)]
pub struct JudgedFinding {
    pub trope_id: TropeId,
    pub confidence: f32,
    pub evidence_start: usize,
    pub evidence_end: usize,
    pub rationale: String,
}

/// Build the judge prompt: scene slice, support block, catalog block with
/// priors, whitelist, and prior-weights map (§4.7).
pub fn build_judge_prompt(
    scene_text: &str,
    scene_char_offset: usize,
    support: &[(ChosenSupport, String)],
    tropes: &[&Trope],
    sanity: &[TropeSanity],
    cfg: &Config,
) -> String {
    let scene_slice = truncate_chars(scene_text, 2_400);

    let support_block: String = support
        .iter()
        .map(|(s, text)| format!("- [{}] {}", s.chunk_id.get(), truncate_chars(text, 400)))
        .collect::<Vec<_>>()
        .join("\n");

    let weight_of = |id: TropeId| -> f32 {
        sanity.iter().find(|s| s.trope_id == id).map(|s| s.weight).unwrap_or(1.0)
    };

    let catalog_block: String = tropes
        .iter()
        .map(|t| format!("{} :: {} — {} (PRIOR={:.2})", t.id.get(), t.name, t.summary, weight_of(t.id)))
        .collect::<Vec<_>>()
        .join("\n");

    let whitelist: Vec<String> = tropes.iter().map(|t| t.id.get().to_string()).collect();
    let prior_weights: String = tropes
        .iter()
        .map(|t| format!("\"{}\":{:.2}", t.id.get(), weight_of(t.id)))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "Scene (absolute char offset {scene_char_offset}):\n{scene_slice}\n\n\
Support snippets:\n{support_block}\n\n\
Candidate tropes:\n{catalog_block}\n\n\
AVAILABLE_TROPE_IDS = [{}]\n\
PRIOR_WEIGHTS = {{{prior_weights}}}\n\n\
Respond with a strict JSON array of objects, each {{\"trope_id\": <id from AVAILABLE_TROPE_IDS>, \"confidence\": <0..1>, \"evidence_char_span\": [start, end], \"rationale\": \"...\"}}. Confidence must already reflect the PRIOR_WEIGHTS entry for that trope after accounting for the evidence quality; discard tropes you cannot evidence. Threshold is {}.",
        whitelist.join(","),
        cfg.threshold,
    )
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Parse the judge's output: a top-level JSON array, else the first fenced
/// ```json block, else the first bracketed `[...]` substring.
fn parse_judge_response(text: &str) -> Vec<RawFinding> {
    if let Ok(parsed) = serde_json::from_str::<Vec<RawFinding>>(text) {
        return parsed;
    }
    if let Ok(fenced_re) = Regex::new(r"```json\s*([\s\S]*?)```") {
        if let Some(caps) = fenced_re.captures(text) {
            if let Ok(parsed) = serde_json::from_str::<Vec<RawFinding>>(&caps[1]) {
                return parsed;
            }
        }
    }
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<Vec<RawFinding>>(&text[start..=end]) {
                return parsed;
            }
        }
    }
    Vec::new()
}

/// Run the judge prompt through `reasoner`, apply priors, clamp spans, and
/// drop anything below threshold. A reasoner transport failure or a parse
/// failure yields no findings for the scene (not fatal, per §4.7).
pub async fn judge_scene(
    prompt: &str,
    reasoner: &dyn Reasoner,
    work_char_count: usize,
    whitelist: &[TropeId],
    sanity: &[TropeSanity],
    cfg: &Config,
) -> Vec<JudgedFinding> {
    let response = match reasoner.complete(prompt, Some(JUDGE_SYSTEM), 0.0).await {
        Ok(text) => text,
        Err(_) => return Vec::new(),
    };

    let raw = parse_judge_response(&response);
    let whitelist_set: std::collections::HashSet<i64> = whitelist.iter().map(|t| t.get()).collect();

    raw.into_iter()
        .filter_map(|f| {
            if !whitelist_set.contains(&f.trope_id) {
                return None;
            }
            let trope_id = TropeId::from(f.trope_id);
            let weight = sanity
                .iter()
                .find(|s| s.trope_id == trope_id)
                .map(|s| s.weight)
                .unwrap_or(1.0);

            let raw_conf = f.confidence.clamp(0.0, 1.0);
            let adj = (raw_conf * weight).clamp(0.0, 1.0);
            if adj < cfg.threshold {
                return None;
            }

            let (mut s, mut e) = (f.evidence_char_span.0.max(0) as usize, f.evidence_char_span.1.max(0) as usize);
            if s > e {
                std::mem::swap(&mut s, &mut e);
            }
            s = s.min(work_char_count);
            e = e.min(work_char_count);
            if e <= s {
                return None;
            }

            let rationale = if (weight - 1.0).abs() > f32::EPSILON {
                format!("{} [prior={:.2}, raw={:.2}, adj={:.2}]", f.rationale, weight, raw_conf, adj)
            } else {
                f.rationale
            };

            Some(JudgedFinding {
                trope_id,
                confidence: adj,
                evidence_start: s,
                evidence_end: e,
                rationale,
            })
        })
        .collect()
}
