//! Error types for reference resolution.
//!
//! None of these errors escape [`crate::ReferenceResolver::resolve`]; they
//! exist so the internal per-tag resolvers can use `?` and let the
//! orchestrator map each failure to its bracketed placeholder.

use thiserror::Error;

/// Result type alias for reference operations.
pub type Result<T> = std::result::Result<T, ReferenceError>;

/// Errors that can occur while resolving a reference.
#[derive(Error, Debug)]
pub enum ReferenceError {
    /// Identifier has no matching content in any backing store.
    #[error("content not found: {0}")]
    NotFound(String),

    /// Content exists but is empty.
    #[error("content is empty: {0}")]
    EmptyContent(String),

    /// Recognized delimiter with an unrecognized kind word.
    #[error("unknown tag variant: {0}")]
    UnknownTag(String),

    /// Embedding gateway failure.
    #[error("embedding error: {0}")]
    Embedding(#[from] muse_embeddings::EmbeddingError),

    /// Vector backend failure (search or upsert).
    #[error("vector backend error: {0}")]
    VectorBackend(String),

    /// Backing store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A bounded external call exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
