//! Analysis job gateway
//!
//! The jobs table is the coordination substrate for the pipeline: status,
//! retry_count, and next_retry_at together form the lock-free protocol the
//! stage workers advance jobs with.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::models::AnalysisJobRecord;
use crate::types::JobStatus;

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<AnalysisJobRecord>> {
    sqlx::query_as::<_, AnalysisJobRecord>("SELECT * FROM analysis_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Latest job for a repository regardless of status. Drives the SSE stream.
pub async fn latest_for_repo(pool: &PgPool, repo_id: Uuid) -> sqlx::Result<Option<AnalysisJobRecord>> {
    sqlx::query_as::<_, AnalysisJobRecord>(
        "SELECT * FROM analysis_jobs WHERE repo_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(repo_id)
    .fetch_optional(pool)
    .await
}

/// Dedup rule 2: latest job with the same (repo, commit, idempotency key),
/// any status.
pub async fn find_by_idempotency_key(
    pool: &PgPool,
    repo_id: Uuid,
    commit_sha: &str,
    idempotency_key: &str,
) -> sqlx::Result<Option<AnalysisJobRecord>> {
    sqlx::query_as::<_, AnalysisJobRecord>(
        r#"
        SELECT * FROM analysis_jobs
        WHERE repo_id = $1 AND commit_sha = $2 AND idempotency_key = $3
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(repo_id)
    .bind(commit_sha)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await
}

/// Dedup rule 3: latest job for (repo, commit) that is either still active
/// or already done. Failed jobs do not block re-analysis.
pub async fn find_active_or_done(
    pool: &PgPool,
    repo_id: Uuid,
    commit_sha: &str,
) -> sqlx::Result<Option<AnalysisJobRecord>> {
    sqlx::query_as::<_, AnalysisJobRecord>(
        r#"
        SELECT * FROM analysis_jobs
        WHERE repo_id = $1
          AND commit_sha = $2
          AND status = ANY($3)
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(repo_id)
    .bind(commit_sha)
    .bind(
        JobStatus::ACTIVE
            .iter()
            .map(|s| s.as_str().to_string())
            .chain(std::iter::once(JobStatus::Done.as_str().to_string()))
            .collect::<Vec<_>>(),
    )
    .fetch_optional(pool)
    .await
}

pub async fn create(
    pool: &PgPool,
    repo_id: Uuid,
    user_id: Option<Uuid>,
    idempotency_key: Option<&str>,
    commit_sha: &str,
) -> sqlx::Result<AnalysisJobRecord> {
    sqlx::query_as::<_, AnalysisJobRecord>(
        r#"
        INSERT INTO analysis_jobs (id, repo_id, user_id, idempotency_key, commit_sha, status, progress)
        VALUES ($1, $2, $3, $4, $5, 'queued', 0)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(repo_id)
    .bind(user_id)
    .bind(idempotency_key)
    .bind(commit_sha)
    .fetch_one(pool)
    .await
}

/// Candidate row for the parsing worker.
#[derive(Debug, Clone, FromRow)]
pub struct ParseCandidate {
    pub job_id: Uuid,
    pub repo_id: Uuid,
    pub commit_sha: String,
    pub github_url: String,
}

pub async fn next_parse_candidate(pool: &PgPool) -> sqlx::Result<Option<ParseCandidate>> {
    sqlx::query_as::<_, ParseCandidate>(
        r#"
        SELECT j.id AS job_id, j.repo_id, j.commit_sha, r.github_url
        FROM analysis_jobs j
        JOIN repositories r ON r.id = j.repo_id
        WHERE j.status IN ('queued', 'parsing')
          AND (j.next_retry_at IS NULL OR j.next_retry_at <= NOW())
        ORDER BY j.created_at ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

/// Candidate row for the embedding worker.
#[derive(Debug, Clone, FromRow)]
pub struct EmbedCandidate {
    pub job_id: Uuid,
    pub repo_id: Uuid,
}

pub async fn next_embed_candidate(pool: &PgPool) -> sqlx::Result<Option<EmbedCandidate>> {
    sqlx::query_as::<_, EmbedCandidate>(
        r#"
        SELECT id AS job_id, repo_id
        FROM analysis_jobs
        WHERE status = 'embedding'
          AND (next_retry_at IS NULL OR next_retry_at <= NOW())
        ORDER BY created_at ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

/// Candidate row for the analysis worker.
#[derive(Debug, Clone, FromRow)]
pub struct AnalyzeCandidate {
    pub job_id: Uuid,
    pub repo_id: Uuid,
    pub full_name: String,
    pub default_branch: String,
}

pub async fn next_analyze_candidate(pool: &PgPool) -> sqlx::Result<Option<AnalyzeCandidate>> {
    sqlx::query_as::<_, AnalyzeCandidate>(
        r#"
        SELECT j.id AS job_id, j.repo_id, r.full_name,
               COALESCE(r.default_branch, 'main') AS default_branch
        FROM analysis_jobs j
        JOIN repositories r ON r.id = j.repo_id
        WHERE j.status = 'analyzing'
          AND (j.next_retry_at IS NULL OR j.next_retry_at <= NOW())
        ORDER BY j.created_at ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

/// Conditionally claim a job for a stage.
///
/// The `WHERE status = ANY(expected)` guard makes the transition safe under
/// worker replicas: when two workers race for the same candidate row, only
/// one UPDATE matches and the loser goes back to polling.
pub async fn claim(
    pool: &PgPool,
    job_id: Uuid,
    expected: &[JobStatus],
    next: JobStatus,
    progress: i32,
) -> sqlx::Result<bool> {
    let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = $2, progress = $3, error_message = NULL, next_retry_at = NULL
        WHERE id = $1
          AND status = ANY($4)
          AND (next_retry_at IS NULL OR next_retry_at <= NOW())
        "#,
    )
    .bind(job_id)
    .bind(next.as_str())
    .bind(progress)
    .bind(expected)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Milestone write: every update commits immediately so the SSE poller
/// observes progress as it happens.
pub async fn update_status(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    progress: i32,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = $2, progress = $3, error_message = NULL, next_retry_at = NULL
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(status.as_str())
    .bind(progress)
    .execute(pool)
    .await?;
    Ok(())
}

/// Park a job for a later retry of the same stage.
pub async fn schedule_retry(
    pool: &PgPool,
    job_id: Uuid,
    stage_status: &str,
    error_message: &str,
    retry_count: i32,
    next_retry_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = $2,
            error_message = $3,
            retry_count = $4,
            next_retry_at = $5,
            completed_at = NULL
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(stage_status)
    .bind(error_message)
    .bind(retry_count)
    .bind(next_retry_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Terminal failure: progress pinned at 100, completion stamped.
pub async fn mark_failed(pool: &PgPool, job_id: Uuid, error_message: &str) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'failed',
            progress = 100,
            error_message = $2,
            completed_at = NOW(),
            next_retry_at = NULL
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Terminal success.
pub async fn mark_done(pool: &PgPool, job_id: Uuid) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'done', progress = 100, completed_at = NOW(),
            error_message = NULL, next_retry_at = NULL
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn retry_count(pool: &PgPool, job_id: Uuid) -> sqlx::Result<i32> {
    let count: Option<i32> =
        sqlx::query_scalar("SELECT retry_count FROM analysis_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await?;
    Ok(count.unwrap_or(0))
}
