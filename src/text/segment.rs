//! Chapter and scene segmentation (§4.1).
//!
//! Chapter anchors are lines matching `(chapter|ch\.|book|part) <roman|digits|word>`;
//! if none are found, a single chapter spans the whole work. Within a
//! chapter, scene boundaries are ornament separator lines or runs of two or
//! more blank lines.

use super::model::Span;
use regex::Regex;
use std::sync::OnceLock;

fn chapter_anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(chapter|ch\.|book|part)\s+([ivxlcdm]+|\d+|[a-z]+)\b.*$").unwrap()
    })
}

fn separator_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([*\-—–_~]{3,}|\* \* \*)\s*$").unwrap())
}

/// A detected chapter: byte-stable line offsets translated to character
/// offsets by the caller via `line_offsets`.
#[derive(Debug, Clone)]
pub struct DetectedChapter {
    pub idx: usize,
    pub title: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct DetectedScene {
    pub idx: usize,
    pub span: Span,
    pub heading: Option<String>,
}

/// Byte/char offsets of the start of each line in `text`, plus the
/// char-length of `text` as a terminal sentinel.
fn line_char_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0usize];
    let mut pos = 0usize;
    for ch in text.chars() {
        pos += 1;
        if ch == '\n' {
            offsets.push(pos);
        }
    }
    offsets
}

/// Split `norm_text` into chapters. If no chapter anchors are found, returns
/// a single chapter spanning the whole text.
pub fn detect_chapters(norm_text: &str) -> Vec<DetectedChapter> {
    let lines: Vec<&str> = norm_text.split('\n').collect();
    let line_offsets = line_char_offsets(norm_text);
    let char_count = norm_text.chars().count();

    let mut anchor_lines: Vec<(usize, String)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if chapter_anchor_re().is_match(line) {
            anchor_lines.push((i, line.trim().to_string()));
        }
    }

    if anchor_lines.is_empty() {
        return vec![DetectedChapter {
            idx: 0,
            title: None,
            span: Span::new(0, char_count),
        }];
    }

    let mut chapters = Vec::with_capacity(anchor_lines.len());
    for (i, (line_idx, title)) in anchor_lines.iter().enumerate() {
        let start = line_offsets[*line_idx];
        let end = anchor_lines
            .get(i + 1)
            .map(|(next_line, _)| line_offsets[*next_line])
            .unwrap_or(char_count);
        chapters.push(DetectedChapter {
            idx: i,
            title: Some(title.clone()),
            span: Span::new(start, end),
        });
    }
    chapters
}

/// Split a chapter's text (relative offsets) into scenes. Anchors
/// `{0, separators…, N}` partition the chapter; empty partitions are
/// dropped. Offsets returned are relative to the start of `chapter_text`;
/// the caller translates them to work-absolute by adding the chapter's span
/// start.
pub fn detect_scenes(chapter_text: &str) -> Vec<DetectedScene> {
    let lines: Vec<&str> = chapter_text.split('\n').collect();
    let line_offsets = line_char_offsets(chapter_text);
    let char_count = chapter_text.chars().count();

    let mut anchors: Vec<usize> = vec![0];
    let mut blank_run = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if separator_line_re().is_match(line) {
            anchors.push(line_offsets[i]);
            // The separator line itself is excluded from both surrounding
            // scenes by anchoring at the line *after* it.
            if i + 1 < line_offsets.len() {
                anchors.push(line_offsets[i + 1]);
            }
            blank_run = 0;
            continue;
        }
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run == 2 {
                anchors.push(line_offsets[i - 1]);
                if i + 1 < line_offsets.len() {
                    anchors.push(line_offsets[i + 1]);
                }
            }
        } else {
            blank_run = 0;
        }
    }
    anchors.push(char_count);
    anchors.sort_unstable();
    anchors.dedup();

    let mut scenes = Vec::new();
    let mut idx = 0usize;
    for w in anchors.windows(2) {
        let (start, end) = (w[0], w[1]);
        if end <= start {
            continue;
        }
        let text: String = chapter_text.chars().skip(start).take(end - start).collect();
        if text.trim().is_empty() {
            continue;
        }
        scenes.push(DetectedScene {
            idx,
            span: Span::new(start, end),
            heading: None,
        });
        idx += 1;
    }

    if scenes.is_empty() {
        scenes.push(DetectedScene {
            idx: 0,
            span: Span::new(0, char_count),
            heading: None,
        });
    }
    scenes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_anchors_yields_single_chapter() {
        let text = "Just some prose with no chapter markers at all.";
        let chapters = detect_chapters(text);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].span, Span::new(0, text.chars().count()));
    }

    #[test]
    fn chapter_keyword_variants_detected() {
        let text = "Chapter 1\nSome text.\n\nCh. II\nMore text.\n\nPart Three\nEven more.";
        let chapters = detect_chapters(text);
        assert_eq!(chapters.len(), 3);
    }

    #[test]
    fn scene_separator_splits_chapter() {
        let text = "First scene text.\n***\nSecond scene text.";
        let scenes = detect_scenes(text);
        assert_eq!(scenes.len(), 2);
        assert!(scenes[0].span.end <= scenes[1].span.start);
    }

    #[test]
    fn double_blank_line_splits_scenes() {
        let text = "First scene.\n\n\nSecond scene.";
        let scenes = detect_scenes(text);
        assert_eq!(scenes.len(), 2);
    }

    #[test]
    fn single_blank_line_does_not_split() {
        let text = "First paragraph.\n\nStill same scene.";
        let scenes = detect_scenes(text);
        assert_eq!(scenes.len(), 1);
    }

    #[test]
    fn scenes_partition_without_overlap() {
        let text = "A.\n***\nB.\n\n\nC.";
        let scenes = detect_scenes(text);
        for w in scenes.windows(2) {
            assert!(w[0].span.end <= w[1].span.start);
        }
    }
}
