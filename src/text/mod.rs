//! Text store (C1): canonical normalized text and its Work/Chapter/Scene/Chunk
//! segmentation, with stable character offsets.

pub mod chunk;
pub mod model;
pub mod normalize;
pub mod segment;

pub use chunk::{chunk_scene, tokenize, ChunkWindow, Token};
pub use model::{Chapter, ChapterId, Chunk, ChunkId, FindingId, Scene, SceneId, Span, TropeId, Work, WorkId};
pub use normalize::{decode, normalize as normalize_text, Codec};
pub use segment::{detect_chapters, detect_scenes, DetectedChapter, DetectedScene};

use crate::config::Config;

/// Result of segmenting and chunking a work's normalized text: everything
/// needed to persist Chapter/Scene/Chunk rows, without touching the store.
pub struct Segmentation {
    pub chapters: Vec<DetectedChapter>,
    /// Scenes per chapter, in chapter order, with work-absolute spans.
    pub scenes_by_chapter: Vec<Vec<DetectedScene>>,
    /// Chunks per scene (parallel to the flattened scene list), with
    /// work-absolute spans.
    pub chunks_by_scene: Vec<Vec<ChunkWindow>>,
}

/// Run chapter -> scene -> chunk segmentation over a work's normalized text.
/// All returned spans are work-absolute.
pub fn segment_work(norm_text: &str, cfg: &Config) -> Segmentation {
    let chapters = detect_chapters(norm_text);
    let mut scenes_by_chapter = Vec::with_capacity(chapters.len());
    let mut chunks_by_scene = Vec::new();

    for chapter in &chapters {
        let chapter_text: String = norm_text
            .chars()
            .skip(chapter.span.start)
            .take(chapter.span.len())
            .collect();
        let mut scenes = detect_scenes(&chapter_text);
        for scene in &mut scenes {
            // Translate scene offsets from chapter-relative to work-absolute.
            scene.span.start += chapter.span.start;
            scene.span.end += chapter.span.start;

            let scene_text: String = norm_text
                .chars()
                .skip(scene.span.start)
                .take(scene.span.len())
                .collect();
            let mut chunks = chunk_scene(&scene_text, cfg);
            for c in &mut chunks {
                c.span.start += scene.span.start;
                c.span.end += scene.span.start;
            }
            chunks_by_scene.push(chunks);
        }
        scenes_by_chapter.push(scenes);
    }

    Segmentation {
        chapters,
        scenes_by_chapter,
        chunks_by_scene,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_spans_are_work_absolute_and_nested() {
        let text = "Chapter 1\nFirst scene goes here with enough words to chunk nicely today.\n***\nSecond scene follows right after the separator line cleanly.";
        let cfg = Config::default();
        let seg = segment_work(text, &cfg);
        assert_eq!(seg.chapters.len(), 1);
        let char_len = text.chars().count();
        for scenes in &seg.scenes_by_chapter {
            for scene in scenes {
                assert!(scene.span.end <= char_len);
                assert!(scene.span.start < scene.span.end);
            }
        }
        for chunks in &seg.chunks_by_scene {
            for c in chunks {
                assert!(c.span.end <= char_len);
            }
        }
    }
}
