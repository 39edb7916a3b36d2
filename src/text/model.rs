//! Data model for the text store (§3): Work, Chapter, Scene, Chunk.
//!
//! Offsets are half-open `[start, end)` character (not byte) indices into
//! `Work::norm_text`, stable for the lifetime of a work. IDs are thin
//! newtypes over `i64` (SQLite `INTEGER PRIMARY KEY AUTOINCREMENT` rowids),
//! mirroring the teacher's `NodeId` newtype pattern (`graph/node.rs`) but
//! sized for relational row identity rather than UUIDs.

use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

row_id!(WorkId);
row_id!(ChapterId);
row_id!(SceneId);
row_id!(ChunkId);
row_id!(TropeId);
row_id!(FindingId);

/// A half-open character range `[start, end)` into a work's normalized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn midpoint(&self) -> usize {
        self.start + self.len() / 2
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Work {
    pub id: WorkId,
    pub title: String,
    pub author: Option<String>,
    pub raw_text: String,
    pub norm_text: String,
    pub char_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub work_id: WorkId,
    pub idx: usize,
    pub title: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub work_id: WorkId,
    pub chapter_id: Option<ChapterId>,
    pub idx: usize,
    pub span: Span,
    pub heading: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub work_id: WorkId,
    pub scene_id: Option<SceneId>,
    pub idx: usize,
    pub span: Span,
    pub token_start: usize,
    pub token_end: usize,
    pub text: String,
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_contains_span() {
        let outer = Span::new(0, 100);
        let inner = Span::new(10, 20);
        assert!(outer.contains_span(&inner));
        assert!(!inner.contains_span(&outer));
    }

    #[test]
    fn span_midpoint() {
        assert_eq!(Span::new(10, 20).midpoint(), 15);
    }

    #[test]
    fn row_id_roundtrips_through_i64() {
        let id = WorkId::from(42);
        assert_eq!(id.get(), 42);
        assert_eq!(format!("{}", id), "42");
    }
}
