//! Span verifier (C8): snap evidence spans to sentence boundaries, rescore
//! against embeddings, flag low-similarity/negation/anti-alias/meta cues,
//! and apply a confidence policy.
//!
//! Grounded on `text/segment.rs`'s line/sentence anchoring approach,
//! reused here at sentence rather than scene granularity, and on
//! `embedding::cosine_similarity` for the α-mixed rescoring in §4.8.

use crate::config::{Config, VerifierPolicy};
use crate::embedding::cosine_similarity;
use regex::Regex;
use std::sync::OnceLock;

fn sentence_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+|\n{2,}").unwrap())
}

fn negation_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(no|never|without|lacking?|absence(?: of)?|free of)\b").unwrap())
}

fn meta_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(parody|satire|meta|lampshade|deconstruct|cliche|cliché)\b").unwrap())
}

/// A sentence span (char offsets relative to the scene text it was split
/// from).
#[derive(Debug, Clone, Copy)]
pub struct Sentence {
    pub start: usize,
    pub end: usize,
}

/// Split `scene_text` into sentences by `[.!?]+\s+` or `\n{2,}`, covering
/// the whole text with contiguous, non-overlapping spans.
pub fn split_sentences(scene_text: &str) -> Vec<Sentence> {
    let char_len = scene_text.chars().count();
    if char_len == 0 {
        return Vec::new();
    }
    let byte_to_char = build_byte_to_char_map(scene_text);
    let mut sentences = Vec::new();
    let mut last = 0usize;
    for m in sentence_split_re().find_iter(scene_text) {
        let end = byte_to_char.get(m.start()).copied().unwrap_or(char_len);
        if end > last {
            sentences.push(Sentence { start: last, end });
        }
        last = byte_to_char.get(m.end()).copied().unwrap_or(char_len);
    }
    if last < char_len {
        sentences.push(Sentence { start: last, end: char_len });
    }
    if sentences.is_empty() {
        sentences.push(Sentence { start: 0, end: char_len });
    }
    sentences
}

fn build_byte_to_char_map(text: &str) -> Vec<usize> {
    let mut map = Vec::with_capacity(text.len() + 1);
    let mut char_idx = 0usize;
    for (byte_idx, _) in text.char_indices() {
        while map.len() <= byte_idx {
            map.push(char_idx);
        }
        char_idx += 1;
    }
    map.push(char_idx);
    map
}

fn sentence_index_for(sentences: &[Sentence], pos: usize) -> usize {
    sentences
        .iter()
        .position(|s| s.start <= pos && pos < s.end)
        .unwrap_or_else(|| {
            // Fallback: nearest sentence by distance to its bounds.
            sentences
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| {
                    if pos < s.start {
                        s.start - pos
                    } else {
                        pos.saturating_sub(s.end)
                    }
                })
                .map(|(i, _)| i)
                .unwrap_or(0)
        })
}

/// A candidate snapped window, relative to the scene text (caller adds the
/// scene's char_start to get work-absolute offsets).
#[derive(Debug, Clone, Copy)]
pub struct SnapCandidate {
    pub start: usize,
    pub end: usize,
}

/// Generate ±k sentence-expanded windows around the sentence containing
/// `orig_start..orig_end`'s midpoint, including the original span,
/// center-capped at `max_chars`.
pub fn candidate_windows(scene_text: &str, orig_start: usize, orig_end: usize, cfg: &Config) -> Vec<SnapCandidate> {
    let sentences = split_sentences(scene_text);
    if sentences.is_empty() {
        return vec![SnapCandidate { start: orig_start, end: orig_end }];
    }
    let midpoint = orig_start + (orig_end.saturating_sub(orig_start)) / 2;
    let center = sentence_index_for(&sentences, midpoint);

    let mut candidates = vec![SnapCandidate { start: orig_start, end: orig_end }];
    for k in 0..=cfg.verifier_expand_sentences {
        let lo = center.saturating_sub(k);
        let hi = (center + k).min(sentences.len() - 1);
        let start = sentences[lo].start;
        let end = sentences[hi].end;
        candidates.push(center_cap(start, end, cfg.verifier_max_chars));
    }
    candidates
}

fn center_cap(start: usize, end: usize, max_chars: usize) -> SnapCandidate {
    let len = end.saturating_sub(start);
    if len <= max_chars {
        return SnapCandidate { start, end };
    }
    let mid = start + len / 2;
    let half = max_chars / 2;
    SnapCandidate {
        start: mid.saturating_sub(half),
        end: (mid + (max_chars - half)).min(end),
    }
}

/// Score one candidate window against a trope-text embedding and a
/// scene-text embedding, mixed by α (§4.8).
pub fn score_candidate(candidate_vec: &[f32], trope_vec: &[f32], scene_vec: &[f32], alpha: f32) -> f32 {
    alpha * cosine_similarity(candidate_vec, trope_vec) + (1.0 - alpha) * cosine_similarity(candidate_vec, scene_vec)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierFlag {
    LowSim,
    NegationCue,
    AntiAlias,
    MetaCue,
    NegationAnti,
}

impl VerifierFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifierFlag::LowSim => "low_sim",
            VerifierFlag::NegationCue => "negation_cue",
            VerifierFlag::AntiAlias => "anti_alias",
            VerifierFlag::MetaCue => "meta_cue",
            VerifierFlag::NegationAnti => "negation_anti",
        }
    }
}

/// Decide the verifier flag for a finalized span, given the surrounding
/// window text and an optional matched alias (for the `not <alias>` and
/// `anti-<alias>` checks).
pub fn flag_for(
    window_text: &str,
    alias: Option<&str>,
    best_score: f32,
    threshold: f32,
) -> Option<VerifierFlag> {
    let negation = negation_cue_re().is_match(window_text)
        || alias
            .map(|a| {
                let not_alias_re = Regex::new(&format!(r"(?i)\bnot\b.{{0,16}}{}", regex::escape(a))).unwrap();
                not_alias_re.is_match(window_text)
            })
            .unwrap_or(false);

    let anti = alias
        .map(|a| {
            let anti_re = Regex::new(&format!(r"(?i)anti[\-\s]+{}", regex::escape(a))).unwrap();
            anti_re.is_match(window_text)
        })
        .unwrap_or(false);

    let meta = meta_cue_re().is_match(window_text);

    if negation && anti {
        return Some(VerifierFlag::NegationAnti);
    }
    if negation {
        return Some(VerifierFlag::NegationCue);
    }
    if anti {
        return Some(VerifierFlag::AntiAlias);
    }
    if meta {
        return Some(VerifierFlag::MetaCue);
    }
    if best_score < threshold {
        return Some(VerifierFlag::LowSim);
    }
    None
}

/// Apply the configured policy to a confidence given its flag.
pub fn apply_policy(confidence: f32, flag: Option<VerifierFlag>, cfg: &Config) -> (f32, bool) {
    let Some(flag) = flag else {
        return (confidence, false);
    };
    match cfg.verifier_policy {
        VerifierPolicy::FlagOnly => (confidence, false),
        VerifierPolicy::Downweight => {
            let factor = match flag {
                VerifierFlag::NegationCue | VerifierFlag::NegationAnti => cfg.verifier_negation_factor,
                VerifierFlag::MetaCue => cfg.verifier_meta_factor,
                VerifierFlag::AntiAlias => cfg.verifier_anti_factor,
                VerifierFlag::LowSim => 1.0,
            };
            ((confidence * factor).clamp(0.0, 1.0), false)
        }
        VerifierPolicy::Delete => (confidence, true),
    }
}

/// Pick the best-scoring candidate, adopting it only if it beats the
/// original by `min_gain`, or the original was sub-threshold and the best
/// crosses it (§4.8).
pub fn choose_best<'a>(
    candidates: &'a [(SnapCandidate, f32)],
    orig_score: f32,
    threshold: f32,
    min_gain: f32,
) -> &'a SnapCandidate {
    let (best_candidate, best_score) = candidates
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .expect("candidates is non-empty");

    let crosses_threshold = orig_score < threshold && *best_score >= threshold;
    if *best_score >= orig_score + min_gain || crosses_threshold {
        best_candidate
    } else {
        &candidates[0].0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sentences_covers_whole_text() {
        let text = "First sentence. Second sentence! Third?";
        let sentences = split_sentences(text);
        assert_eq!(sentences.first().unwrap().start, 0);
        assert_eq!(sentences.last().unwrap().end, text.chars().count());
    }

    #[test]
    fn split_sentences_handles_blank_line_breaks() {
        let text = "Paragraph one.\n\nParagraph two.";
        let sentences = split_sentences(text);
        assert!(sentences.len() >= 2);
    }

    #[test]
    fn candidate_windows_includes_original() {
        let text = "One. Two. Three. Four. Five.";
        let cfg = Config::default();
        let cands = candidate_windows(text, 5, 8, &cfg);
        assert!(cands.iter().any(|c| c.start == 5 && c.end == 8));
    }

    #[test]
    fn center_cap_shrinks_oversized_window() {
        let cap = center_cap(0, 1000, 100);
        assert_eq!(cap.end - cap.start, 100);
    }

    #[test]
    fn flag_for_detects_negation() {
        let flag = flag_for("He was never the chosen one.", None, 0.9, 0.3);
        assert_eq!(flag, Some(VerifierFlag::NegationCue));
    }

    #[test]
    fn flag_for_detects_not_near_alias() {
        let flag = flag_for("He was definitely not a hero here.", Some("hero"), 0.9, 0.3);
        assert_eq!(flag, Some(VerifierFlag::NegationCue));
    }

    #[test]
    fn flag_for_detects_anti_alias() {
        let flag = flag_for("This is the anti-hero archetype.", Some("hero"), 0.9, 0.3);
        assert_eq!(flag, Some(VerifierFlag::AntiAlias));
    }

    #[test]
    fn flag_for_detects_meta_cue() {
        let flag = flag_for("A clear parody of the trope.", None, 0.9, 0.3);
        assert_eq!(flag, Some(VerifierFlag::MetaCue));
    }

    #[test]
    fn flag_for_low_sim_when_no_cues_and_below_threshold() {
        let flag = flag_for("Nothing special happens here.", None, 0.1, 0.3);
        assert_eq!(flag, Some(VerifierFlag::LowSim));
    }

    #[test]
    fn flag_for_combines_negation_and_anti() {
        let flag = flag_for("He was never the anti-hero either.", Some("hero"), 0.9, 0.3);
        assert_eq!(flag, Some(VerifierFlag::NegationAnti));
    }

    #[test]
    fn apply_policy_flag_only_leaves_confidence_untouched() {
        let mut cfg = Config::default();
        cfg.verifier_policy = VerifierPolicy::FlagOnly;
        let (conf, delete) = apply_policy(0.8, Some(VerifierFlag::NegationCue), &cfg);
        assert_eq!(conf, 0.8);
        assert!(!delete);
    }

    #[test]
    fn apply_policy_downweight_multiplies_by_factor() {
        let mut cfg = Config::default();
        cfg.verifier_policy = VerifierPolicy::Downweight;
        cfg.verifier_negation_factor = 0.6;
        let (conf, delete) = apply_policy(0.8, Some(VerifierFlag::NegationCue), &cfg);
        assert!((conf - 0.48).abs() < 1e-6);
        assert!(!delete);
    }

    #[test]
    fn apply_policy_delete_marks_for_deletion() {
        let mut cfg = Config::default();
        cfg.verifier_policy = VerifierPolicy::Delete;
        let (_, delete) = apply_policy(0.8, Some(VerifierFlag::AntiAlias), &cfg);
        assert!(delete);
    }

    #[test]
    fn choose_best_requires_min_gain() {
        let candidates = vec![
            (SnapCandidate { start: 0, end: 10 }, 0.5),
            (SnapCandidate { start: 5, end: 15 }, 0.52),
        ];
        let best = choose_best(&candidates, 0.5, 0.3, 0.1);
        assert_eq!(best.start, 0);
    }

    #[test]
    fn choose_best_adopts_when_crossing_threshold() {
        let candidates = vec![
            (SnapCandidate { start: 0, end: 10 }, 0.2),
            (SnapCandidate { start: 5, end: 15 }, 0.4),
        ];
        let best = choose_best(&candidates, 0.2, 0.3, 0.5);
        assert_eq!(best.start, 5);
    }
}
