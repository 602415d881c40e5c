//! Error types for the DevLens runtime

use thiserror::Error;

use super::Stage;
use crate::config::ConfigError;

/// Top-level runtime error, used by the binary entrypoints and by code that
/// has no more specific error to speak of.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A classified pipeline-stage failure.
///
/// The `code` drives the centralized retry decision in
/// [`crate::workers::reliability`]; the persisted `error_message` is
/// `"CODE: message"` so SSE clients can split it back apart.
#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: Stage,
    pub code: String,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Catch-all for panics-adjacent failures a stage did not classify.
    pub fn unexpected(stage: Stage, message: impl Into<String>) -> Self {
        let code = match stage {
            Stage::Parsing => "UNEXPECTED_PARSE_ERROR",
            Stage::Embedding => "UNEXPECTED_EMBED_ERROR",
            Stage::Analyzing => "UNEXPECTED_ANALYZE_ERROR",
        };
        Self::new(stage, code, message)
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
