//! trope-miner: narrative-trope evidence mining over prose.
//!
//! A pipeline that segments a work into chapters, scenes, and chunks with
//! stable character offsets; embeds and indexes those chunks; seeds trope
//! candidates by gazetteer matching and semantic similarity; reranks and
//! judges scene-level evidence with an LLM; and verifies/snaps the final
//! spans before persisting findings.
//!
//! # Core Concepts
//!
//! - **Work / Chapter / Scene / Chunk**: the segmentation tree, offsets are
//!   half-open character ranges into a work's normalized text.
//! - **Trope**: a catalog definition with a name, summary, aliases, and
//!   anti-aliases used to recognize and rule out mentions.
//! - **Candidate -> Finding**: gazetteer/semantic candidates narrow each
//!   scene's trope set; the judge turns that into scored, evidenced findings;
//!   the verifier snaps and flags the final span.
//!
//! # Example
//!
//! ```no_run
//! use trope_miner::config::Config;
//! use trope_miner::store::{OpenTropeStore, SqliteTropeStore};
//!
//! let cfg = Config::from_env();
//! let store = SqliteTropeStore::open_in_memory().unwrap();
//! ```

pub mod candidate;
pub mod catalog;
pub mod config;
pub mod embedding;
pub mod error;
pub mod gazetteer;
pub mod judge;
pub mod pipeline;
pub mod reasoner;
pub mod rerank;
pub mod seeder;
pub mod store;
pub mod text;
pub mod vector;
pub mod verifier;

pub use candidate::{CandidateSource, TropeCandidate};
pub use catalog::Trope;
pub use config::Config;
pub use embedding::{cosine_similarity, Embedder, HttpEmbedder, MockEmbedder};
pub use error::{Result, TropeMinerError};
pub use pipeline::Pipeline;
pub use reasoner::{HttpReasoner, MockReasoner, Reasoner};
pub use store::{OpenTropeStore, SqliteTropeStore, TropeStore};
pub use text::{Chapter, Chunk, Scene, Span, Work};
pub use vector::VectorIndex;
#[cfg(feature = "vector-index")]
pub use vector::SqliteVecIndex;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
