//! Centralized retry and dead-letter policy
//!
//! Every stage funnels its classified failure through here. Retriable codes
//! back off exponentially until the budget runs out; everything else (and
//! exhausted budgets) becomes a terminal failure plus a dead-letter row.

use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::db::{dead_letters, jobs};
use crate::types::{Stage, StageError};

/// Retry classification:
/// - any `*TIMEOUT` code,
/// - `EMBED_UPSERT_FAILED` at embedding,
/// - `CLONE_FAILED` / `CLONE_TIMEOUT` at parsing,
/// - any `UNEXPECTED_*` code.
pub fn is_retriable_error(stage: Stage, code: &str) -> bool {
    if code.ends_with("TIMEOUT") {
        return true;
    }
    if stage == Stage::Embedding && code == "EMBED_UPSERT_FAILED" {
        return true;
    }
    if stage == Stage::Parsing && matches!(code, "CLONE_FAILED" | "CLONE_TIMEOUT") {
        return true;
    }
    code.starts_with("UNEXPECTED_")
}

/// `base * 2^retry_count`, saturating rather than overflowing.
pub fn backoff_delay_seconds(base_delay_seconds: i64, retry_count: i32) -> i64 {
    let factor = 1i64.checked_shl(retry_count.clamp(0, 62) as u32).unwrap_or(i64::MAX);
    base_delay_seconds.saturating_mul(factor)
}

/// Either park the job for a retry of the same stage, or fail it terminally
/// and record a dead-letter row with `attempt_count = retry_count`.
pub async fn schedule_retry_or_dead_letter(
    pool: &PgPool,
    config: &WorkerConfig,
    job_id: Uuid,
    repo_id: Uuid,
    error: &StageError,
    metadata: Value,
) -> sqlx::Result<()> {
    let retry_count = jobs::retry_count(pool, job_id).await?;
    let max_attempts = config.retry_max_attempts.max(0);
    let retriable = is_retriable_error(error.stage, &error.code);
    let error_message = error.to_string();

    if retriable && retry_count < max_attempts {
        let delay = backoff_delay_seconds(config.retry_base_delay_seconds, retry_count);
        let next_retry_at = Utc::now() + Duration::seconds(delay);
        tracing::warn!(
            %job_id,
            stage = error.stage.as_str(),
            code = %error.code,
            retry_count = retry_count + 1,
            delay_seconds = delay,
            "stage failed, scheduling retry"
        );
        return jobs::schedule_retry(
            pool,
            job_id,
            error.stage.as_str(),
            &error_message,
            retry_count + 1,
            next_retry_at,
        )
        .await;
    }

    tracing::error!(
        %job_id,
        stage = error.stage.as_str(),
        code = %error.code,
        attempts = retry_count,
        "stage failed terminally, dead-lettering"
    );
    jobs::mark_failed(pool, job_id, &error_message).await?;
    dead_letters::insert(
        pool,
        job_id,
        repo_id,
        error.stage.as_str(),
        &error.code,
        &error.message,
        retry_count,
        &metadata,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_codes_are_always_retriable() {
        assert!(is_retriable_error(Stage::Parsing, "CLONE_TIMEOUT"));
        assert!(is_retriable_error(Stage::Embedding, "SOME_TIMEOUT"));
        assert!(is_retriable_error(Stage::Analyzing, "LLM_TIMEOUT"));
    }

    #[test]
    fn embed_upsert_is_retriable_only_at_embedding() {
        assert!(is_retriable_error(Stage::Embedding, "EMBED_UPSERT_FAILED"));
        assert!(!is_retriable_error(Stage::Parsing, "EMBED_UPSERT_FAILED"));
        assert!(!is_retriable_error(Stage::Analyzing, "EMBED_UPSERT_FAILED"));
    }

    #[test]
    fn clone_failures_are_retriable_only_at_parsing() {
        assert!(is_retriable_error(Stage::Parsing, "CLONE_FAILED"));
        assert!(!is_retriable_error(Stage::Embedding, "CLONE_FAILED"));
    }

    #[test]
    fn unexpected_codes_are_retriable() {
        assert!(is_retriable_error(Stage::Parsing, "UNEXPECTED_PARSE_ERROR"));
        assert!(is_retriable_error(Stage::Analyzing, "UNEXPECTED_ANALYZE_ERROR"));
    }

    #[test]
    fn guardrail_codes_are_terminal() {
        assert!(!is_retriable_error(Stage::Parsing, "FILE_LIMIT_EXCEEDED"));
        assert!(!is_retriable_error(Stage::Parsing, "CHUNK_LIMIT_EXCEEDED"));
        assert!(!is_retriable_error(Stage::Parsing, "INVALID_CHUNK_CONFIG"));
        assert!(!is_retriable_error(Stage::Embedding, "NO_CHUNKS"));
        assert!(!is_retriable_error(Stage::Embedding, "EMBED_VECTOR_MISMATCH"));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay_seconds(30, 0), 30);
        assert_eq!(backoff_delay_seconds(30, 1), 60);
        assert_eq!(backoff_delay_seconds(30, 2), 120);
        assert_eq!(backoff_delay_seconds(30, 3), 240);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        assert_eq!(backoff_delay_seconds(i64::MAX, 5), i64::MAX);
        assert!(backoff_delay_seconds(30, 100) > 0);
    }
}
