//! Relational persistence for the trope-mining pipeline (§3, §6).

pub mod sqlite;
pub mod traits;

pub use sqlite::SqliteTropeStore;
pub use traits::{EmbeddingRef, OpenTropeStore, SceneSupport, SupportSelectionRow, TropeFinding, TropeSanityRow, TropeStore};
