//! Tokenizer and scene chunker (§4.1).
//!
//! The chunker operates on a single scene's text and produces overlapping
//! windows sized in *tokens* (not characters), snapped outward to sentence
//! boundaries when that's cheap to do.

use super::model::Span;
use crate::config::Config;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+|[^\w\s]").unwrap())
}

/// A single token's character span (relative to the text it was tokenized
/// from) and its text.
#[derive(Debug, Clone)]
pub struct Token {
    pub start: usize,
    pub end: usize,
}

/// Tokenize `text`, matching `\w+|[^\w\s]`, returning char offsets relative
/// to `text`.
pub fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let byte_to_char: Vec<usize> = {
        let mut map = Vec::with_capacity(text.len() + 1);
        let mut char_idx = 0;
        for (byte_idx, ch) in text.char_indices() {
            while map.len() <= byte_idx {
                map.push(char_idx);
            }
            char_idx += 1;
            let _ = ch;
        }
        map.push(chars.len());
        map
    };

    token_re()
        .find_iter(text)
        .map(|m| Token {
            start: byte_to_char.get(m.start()).copied().unwrap_or(chars.len()),
            end: byte_to_char.get(m.end()).copied().unwrap_or(chars.len()),
        })
        .collect()
}

fn is_sentence_terminal(text_chars: &[char], token: &Token) -> bool {
    token.end > token.start
        && matches!(text_chars.get(token.end - 1), Some('.') | Some('!') | Some('?'))
}

/// A chunked window inside a scene, offsets relative to the scene's text.
#[derive(Debug, Clone)]
pub struct ChunkWindow {
    pub idx: usize,
    pub span: Span,
    pub token_start: usize,
    pub token_end: usize,
    pub text: String,
    pub sha256: String,
}

/// Chunk a scene's text into overlapping token windows per `cfg`.
///
/// Algorithm (§4.1): walk tokens in windows targeting `chunk_target_tokens`,
/// bounded to `[chunk_min_tokens, chunk_max_tokens]`; after the nominal end
/// `j`, extend up to `chunk_extend_tokens` tokens to the next sentence
/// terminal, still bounded by the max; then advance
/// `i <- max(0, j - chunk_overlap_tokens)` until the scene is exhausted.
pub fn chunk_scene(scene_text: &str, cfg: &Config) -> Vec<ChunkWindow> {
    let tokens = tokenize(scene_text);
    let chars: Vec<char> = scene_text.chars().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let n = tokens.len();
    let mut windows = Vec::new();
    let mut i = 0usize;
    let mut idx = 0usize;

    while i < n {
        let nominal_end = (i + cfg.chunk_target_tokens).min(n);
        let mut j = nominal_end.max((i + cfg.chunk_min_tokens).min(n));
        j = j.min((i + cfg.chunk_max_tokens).min(n));

        if j < n {
            let hard_max = (i + cfg.chunk_max_tokens).min(n);
            let extend_limit = (j + cfg.chunk_extend_tokens).min(hard_max);
            let mut extended = j;
            for k in j..extend_limit {
                if is_sentence_terminal(&chars, &tokens[k]) {
                    extended = k + 1;
                    break;
                }
            }
            j = extended;
        }
        if j <= i {
            j = (i + 1).min(n);
        }

        let start = tokens[i].start;
        let end = tokens[j - 1].end;
        let text: String = chars[start..end].iter().collect();
        let sha256 = hex_sha256(text.as_bytes());

        windows.push(ChunkWindow {
            idx,
            span: Span::new(start, end),
            token_start: i,
            token_end: j,
            text,
            sha256,
        });
        idx += 1;

        if j >= n {
            break;
        }
        let next_i = j.saturating_sub(cfg.chunk_overlap_tokens);
        i = if next_i > i { next_i } else { j };
    }

    windows
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
