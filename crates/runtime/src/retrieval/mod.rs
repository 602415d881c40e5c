//! Retrieval engine: lexical FTS, dense vector search, hybrid rerank
//!
//! The hybrid ranking is fully deterministic: callers depend on stable
//! ordering for citation equality, so the weights, tokenizer, and tie-break
//! here must not drift.

use thiserror::Error;

pub mod citations;
pub mod dense;
pub mod embedding;
pub mod hybrid;
pub mod lexical;

pub use citations::Citation;
pub use dense::DenseHit;
pub use hybrid::HybridHit;
pub use lexical::LexicalHit;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Query must not be empty")]
    EmptyQuery,

    #[error("repo_id filter is required")]
    MissingRepoFilter,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Qdrant search failed: {0}")]
    VectorStore(String),
}

/// Clamp a caller-supplied result limit into the supported range.
pub(crate) fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, 100)
}
