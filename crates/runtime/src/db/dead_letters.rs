//! Dead-letter gateway
//!
//! Rows are only ever created when a job exhausts its retry budget or hits a
//! non-retriable error; they preserve the code, attempt count, and ad-hoc
//! metadata for operator triage.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn insert(
    pool: &PgPool,
    job_id: Uuid,
    repo_id: Uuid,
    stage: &str,
    error_code: &str,
    error_message: &str,
    attempt_count: i32,
    metadata: &Value,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO dead_letter_jobs (
            id, job_id, repo_id, stage, error_code, error_message, attempt_count, metadata
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(job_id)
    .bind(repo_id)
    .bind(stage)
    .bind(error_code)
    .bind(error_message)
    .bind(attempt_count)
    .bind(metadata)
    .execute(pool)
    .await?;
    Ok(())
}
