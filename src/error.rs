//! Error taxonomy for the trope-mining pipeline.
//!
//! One variant family per external failure surface, matching
//! `storage/traits.rs::StorageError`'s shape in the teacher crate: small
//! `thiserror` enums with `#[from]` conversions, composed into a single
//! top-level error for the pipeline's `Result`.

use thiserror::Error;

/// Bad configuration: unknown codec, invalid threshold, missing required path.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown text codec: {0}")]
    UnknownCodec(String),
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Store or filesystem I/O failure.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("filesystem error: {0}")]
    Fs(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Embedding client failure.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedder returned no vector")]
    Empty,
    #[error("embedder transport error: {0}")]
    Transport(String),
    #[error("embedder response decode error: {0}")]
    Decode(String),
}

/// Reasoner (LLM) client failure.
#[derive(Debug, Error)]
pub enum ReasonerError {
    #[error("reasoner transport error: {0}")]
    Transport(String),
    #[error("reasoner response parse error: {0}")]
    Parse(String),
}

/// Vector index failure.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("collection not found: {0}")]
    NotFound(String),
    #[error("dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("upsert failed: {0}")]
    Upsert(String),
}

/// Invariant violation on persisted data: offsets, spans, uniqueness.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("offset {offset} out of range for work of length {len}")]
    OffsetOutOfRange { offset: usize, len: usize },
    #[error("inverted span [{start}, {end})")]
    InvertedSpan { start: usize, end: usize },
    #[error("empty span [{start}, {end})")]
    EmptySpan { start: usize, end: usize },
    #[error("unexpected duplicate violating unique constraint: {0}")]
    UnexpectedDuplicate(String),
}

/// Misconfigured policy (e.g. threshold outside [0, 1]).
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("threshold {0} outside [0, 1]")]
    ThresholdOutOfRange(f32),
}

/// Crate-wide error, composing every taxonomy above.
///
/// Per-scene stage errors (embed/rerank/judge/verify) are caught and logged
/// at the call site rather than propagated through this type — only data and
/// store errors are meant to surface all the way to a pipeline caller.
#[derive(Debug, Error)]
pub enum TropeMinerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Reasoner(#[from] ReasonerError),
    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl From<rusqlite::Error> for TropeMinerError {
    fn from(e: rusqlite::Error) -> Self {
        TropeMinerError::Io(IoError::Database(e))
    }
}

impl From<serde_json::Error> for TropeMinerError {
    fn from(e: serde_json::Error) -> Self {
        TropeMinerError::Io(IoError::Serialization(e))
    }
}

pub type Result<T> = std::result::Result<T, TropeMinerError>;
