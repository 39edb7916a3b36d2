//! Gazetteer (C4): alias/anti-alias phrase matching against chunk text.
//!
//! Grounded on the tokenizer's byte-to-char offset translation approach in
//! `text/chunk.rs`, generalized from a fixed `\w+|[^\w\s]` token regex to a
//! per-alias boundary-aware matcher. `regex` has no lookaround support, so
//! word boundaries are modeled with a leading/trailing non-word capture
//! group instead of `\b`, which keeps the boundary check script-agnostic.

use crate::candidate::{CandidateSource, TropeCandidate};
use crate::catalog::Trope;
use crate::config::Config;
use crate::text::{ChunkId, SceneId, WorkId};
use regex::Regex;

const DASH_CLASS: &str = r"[\-\u{2010}\u{2011}\u{2012}\u{2013}\u{2014}\u{2015}]";
const APOSTROPHE_CLASS: &str = r"['\u{2019}]";

const DEFAULT_STOPLIST: &[&str] = &["hero", "villain", "magic", "love", "journey", "quest"];

/// Lowercase, collapse internal whitespace, trim edge punctuation.
pub fn normalize_phrase(s: &str) -> String {
    let lower = s.to_lowercase();
    let trimmed = lower.trim_matches(|c: char| !c.is_alphanumeric());
    let mut out = String::with_capacity(trimmed.len());
    let mut last_was_space = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// A compiled matcher for one alias of one trope.
pub struct AliasMatcher {
    pub alias: String,
    re: Regex,
}

impl AliasMatcher {
    /// Build a case-insensitive, boundary-aware, dash/apostrophe/plural
    /// tolerant matcher for `alias` (already normalized).
    pub fn compile(alias: &str) -> Option<Self> {
        if alias.is_empty() {
            return None;
        }
        let tokens: Vec<&str> = alias.split(' ').filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            return None;
        }

        let mut parts: Vec<String> = Vec::with_capacity(tokens.len());
        for (i, tok) in tokens.iter().enumerate() {
            let escaped = regex::escape(tok);
            let escaped = escaped.replace('-', DASH_CLASS).replace('\'', APOSTROPHE_CLASS);
            let is_last = i == tokens.len() - 1;
            if is_last && tok.chars().all(|c| c.is_alphabetic()) {
                parts.push(format!("{escaped}(?:es|s)?"));
            } else {
                parts.push(escaped);
            }
        }
        let sep = format!("(?:\\s+|{DASH_CLASS}+)");
        let body = parts.join(&sep);
        let pattern = format!(r"(?i)(?:^|[^\w])({body})(?:$|[^\w])");
        Regex::new(&pattern).ok().map(|re| Self {
            alias: alias.to_string(),
            re,
        })
    }

    /// Char-offset matches of this alias within `text`, as `(start, end)`
    /// relative to `text`.
    pub fn find_matches(&self, text: &str) -> Vec<(usize, usize)> {
        let byte_to_char = build_byte_to_char_map(text);
        self.re
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| {
                let start = byte_to_char.get(m.start()).copied().unwrap_or(0);
                let end = byte_to_char.get(m.end()).copied().unwrap_or(0);
                (start, end)
            })
            .collect()
    }
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

/// All compiled alias matchers for a trope: the canonical name plus
/// surviving aliases, and the anti-alias phrase list (normalized, for
/// substring checks).
pub struct TropeGazetteerEntry {
    pub trope_id: crate::text::TropeId,
    pub matchers: Vec<AliasMatcher>,
    pub anti_aliases: Vec<String>,
}

/// Build a gazetteer entry for one trope: canonical name always kept;
/// aliases shorter than `alias_min_len` or on the stoplist are dropped.
pub fn build_entry(trope: &Trope, cfg: &Config) -> TropeGazetteerEntry {
    let mut phrases = vec![normalize_phrase(&trope.name)];
    for alias in &trope.aliases {
        let norm = normalize_phrase(alias);
        if norm.len() < cfg.alias_min_len {
            continue;
        }
        if DEFAULT_STOPLIST.contains(&norm.as_str()) {
            continue;
        }
        phrases.push(norm);
    }
    phrases.sort();
    phrases.dedup();

    let matchers = phrases.iter().filter_map(|p| AliasMatcher::compile(p)).collect();
    let anti_aliases = trope.anti_aliases.iter().map(|a| normalize_phrase(a)).collect();

    TropeGazetteerEntry {
        trope_id: trope.id,
        matchers,
        anti_aliases,
    }
}

/// Does any anti-alias phrase appear anywhere in `chunk_text`? Chunk-level
/// hard block (§4.4 tier 1).
fn chunk_hard_blocked(entry: &TropeGazetteerEntry, chunk_text_lower: &str) -> bool {
    entry
        .anti_aliases
        .iter()
        .any(|a| !a.is_empty() && chunk_text_lower.contains(a.as_str()))
}

/// Near-window soft block (§4.4 tier 2): within `±window` chars of `pos`,
/// any anti-alias phrase, or `anti[-\s]+alias`, or a bare `anti[-\s]+`
/// prefix.
fn near_window_blocked(window_text_lower: &str, anti_aliases: &[String], alias: &str, window: usize) -> bool {
    let _ = window;
    if anti_aliases.iter().any(|a| !a.is_empty() && window_text_lower.contains(a.as_str())) {
        return true;
    }
    let anti_alias_re = Regex::new(&format!(r"(?i)anti[\-\s]+{}", regex::escape(alias))).unwrap();
    if anti_alias_re.is_match(window_text_lower) {
        return true;
    }
    let generic_anti_re = Regex::new(r"(?i)anti[\-\s]+").unwrap();
    generic_anti_re.is_match(window_text_lower)
}

/// Run the gazetteer over one chunk's text, emitting work-absolute
/// candidates. `chunk_char_start` is the chunk's offset into the work.
/// `remaining_budget` is how many more hits this trope may emit across the
/// *whole work* (§4.4: "at most `max_per_trope` hits per trope per work") —
/// callers iterating chunks in a loop must thread a running per-trope
/// counter through this parameter rather than re-deriving it from `cfg` on
/// every call, or the cap resets every chunk instead of bounding cumulatively.
pub fn match_chunk(
    entry: &TropeGazetteerEntry,
    work_id: WorkId,
    scene_id: SceneId,
    chunk_id: ChunkId,
    chunk_text: &str,
    chunk_char_start: usize,
    cfg: &Config,
    remaining_budget: usize,
) -> Vec<TropeCandidate> {
    let chunk_text_lower = chunk_text.to_lowercase();
    if chunk_hard_blocked(entry, &chunk_text_lower) {
        return Vec::new();
    }

    if remaining_budget == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = chunk_text.chars().collect();
    let mut out = Vec::new();

    'matchers: for matcher in &entry.matchers {
        for (start, end) in matcher.find_matches(chunk_text) {
            let window_start = start.saturating_sub(cfg.anti_window);
            let window_end = (end + cfg.anti_window).min(chars.len());
            let window_text: String = chars[window_start..window_end].iter().collect();
            let window_text_lower = window_text.to_lowercase();

            if near_window_blocked(&window_text_lower, &entry.anti_aliases, &matcher.alias, cfg.anti_window) {
                continue;
            }

            let surface: String = chars[start..end].iter().collect();
            out.push(TropeCandidate {
                work_id,
                scene_id,
                chunk_id,
                trope_id: entry.trope_id,
                surface: Some(surface),
                alias: Some(matcher.alias.clone()),
                start: start + chunk_char_start,
                end: end + chunk_char_start,
                source: CandidateSource::Gazetteer,
                score: 1.0,
            });
            if out.len() >= remaining_budget {
                break 'matchers;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::TropeId;

    fn trope(name: &str, aliases: Vec<&str>, anti: Vec<&str>) -> Trope {
        Trope {
            id: TropeId::from(1),
            name: name.to_string(),
            summary: String::new(),
            aliases: aliases.into_iter().map(String::from).collect(),
            anti_aliases: anti.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn normalize_phrase_trims_and_lowercases() {
        assert_eq!(normalize_phrase("  The  Chosen-One! "), "the chosen-one");
    }

    #[test]
    fn canonical_name_never_dropped_even_if_short() {
        let t = trope("Ka", vec![], vec![]);
        let cfg = Config::default();
        let entry = build_entry(&t, &cfg);
        assert_eq!(entry.matchers.len(), 1);
    }

    #[test]
    fn short_alias_below_min_len_is_dropped() {
        let t = trope("Chosen One", vec!["he"], vec![]);
        let cfg = Config::default();
        let entry = build_entry(&t, &cfg);
        assert!(entry.matchers.iter().all(|m| m.alias != "he"));
    }

    #[test]
    fn stoplisted_alias_is_dropped() {
        let t = trope("Chosen One", vec!["hero"], vec![]);
        let cfg = Config::default();
        let entry = build_entry(&t, &cfg);
        assert!(entry.matchers.iter().all(|m| m.alias != "hero"));
    }

    #[test]
    fn matcher_is_boundary_aware() {
        let m = AliasMatcher::compile("hero").unwrap();
        assert!(m.find_matches("the hero arrived").len() == 1);
        assert!(m.find_matches("superheroic feats").is_empty());
    }

    #[test]
    fn matcher_accepts_plural_suffix() {
        let m = AliasMatcher::compile("chosen one").unwrap();
        assert!(!m.find_matches("the chosen ones gathered").is_empty());
    }

    #[test]
    fn matcher_treats_dash_and_space_interchangeably() {
        let m = AliasMatcher::compile("chosen one").unwrap();
        assert!(!m.find_matches("the chosen-one stood alone").is_empty());
    }

    #[test]
    fn matcher_treats_apostrophe_variants_interchangeably() {
        let m = AliasMatcher::compile("dragon's bane").unwrap();
        assert!(!m.find_matches("a dragon\u{2019}s bane lay here").is_empty());
    }

    #[test]
    fn chunk_level_anti_alias_blocks_whole_chunk() {
        let t = trope("Chosen One", vec![], vec!["not the chosen one"]);
        let cfg = Config::default();
        let entry = build_entry(&t, &cfg);
        let cands = match_chunk(
            &entry,
            WorkId::from(1),
            SceneId::from(1),
            ChunkId::from(1),
            "She was not the chosen one after all, everyone knew it.",
            0,
            &cfg,
            cfg.max_per_trope,
        );
        assert!(cands.is_empty());
    }

    #[test]
    fn near_window_anti_prefix_suppresses_match() {
        let t = trope("Chosen One", vec![], vec![]);
        let cfg = Config::default();
        let entry = build_entry(&t, &cfg);
        let cands = match_chunk(
            &entry,
            WorkId::from(1),
            SceneId::from(1),
            ChunkId::from(1),
            "He was the anti-chosen one in every sense of the word.",
            0,
            &cfg,
            cfg.max_per_trope,
        );
        assert!(cands.is_empty());
    }

    #[test]
    fn plain_mention_emits_work_absolute_candidate() {
        let t = trope("Chosen One", vec![], vec![]);
        let cfg = Config::default();
        let entry = build_entry(&t, &cfg);
        let cands = match_chunk(
            &entry,
            WorkId::from(7),
            SceneId::from(2),
            ChunkId::from(3),
            "The chosen one walked alone.",
            100,
            &cfg,
            cfg.max_per_trope,
        );
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].start, 104);
        assert_eq!(cands[0].work_id, WorkId::from(7));
    }

    #[test]
    fn max_per_trope_caps_emitted_candidates() {
        let t = trope("One", vec![], vec![]);
        let mut cfg = Config::default();
        cfg.max_per_trope = 2;
        let entry = build_entry(&t, &cfg);
        let text = "one one one one one";
        let cands = match_chunk(&entry, WorkId::from(1), SceneId::from(1), ChunkId::from(1), text, 0, &cfg, cfg.max_per_trope);
        assert_eq!(cands.len(), 2);
    }

    #[test]
    fn remaining_budget_caps_across_calls_not_just_within_one() {
        let t = trope("One", vec![], vec![]);
        let cfg = Config::default();
        let entry = build_entry(&t, &cfg);
        let text = "one one one";

        let first = match_chunk(&entry, WorkId::from(1), SceneId::from(1), ChunkId::from(1), text, 0, &cfg, 2);
        assert_eq!(first.len(), 2);

        // A second chunk call with an exhausted remaining budget (0) emits
        // nothing, even though the chunk text itself has matches.
        let second = match_chunk(&entry, WorkId::from(1), SceneId::from(1), ChunkId::from(2), text, 0, &cfg, 0);
        assert!(second.is_empty());
    }
}
