//! Analysis result gateway

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::AnalysisResultRecord;

/// Payload written by the analysis stage.
#[derive(Debug, Clone)]
pub struct ResultUpsert {
    pub repo_id: Uuid,
    pub job_id: Uuid,
    pub architecture_summary: String,
    pub quality_score: i32,
    pub language_breakdown: Value,
    pub contributor_stats: Value,
    pub tech_debt_flags: Value,
    pub file_tree: Value,
}

/// Insert the result for a job, or update it in place when the job re-ran.
pub async fn upsert_for_job(pool: &PgPool, payload: &ResultUpsert) -> sqlx::Result<()> {
    let existing: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM analysis_results WHERE job_id = $1 LIMIT 1")
            .bind(payload.job_id)
            .fetch_optional(pool)
            .await?;

    match existing {
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE analysis_results
                SET architecture_summary = $2,
                    quality_score = $3,
                    language_breakdown = $4,
                    contributor_stats = $5,
                    tech_debt_flags = $6,
                    file_tree = $7
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(&payload.architecture_summary)
            .bind(payload.quality_score)
            .bind(&payload.language_breakdown)
            .bind(&payload.contributor_stats)
            .bind(&payload.tech_debt_flags)
            .bind(&payload.file_tree)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO analysis_results (
                    id, repo_id, job_id, architecture_summary, quality_score,
                    language_breakdown, contributor_stats, tech_debt_flags, file_tree
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(payload.repo_id)
            .bind(payload.job_id)
            .bind(&payload.architecture_summary)
            .bind(payload.quality_score)
            .bind(&payload.language_breakdown)
            .bind(&payload.contributor_stats)
            .bind(&payload.tech_debt_flags)
            .bind(&payload.file_tree)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

/// Newest result for a repository (dashboard and share payloads).
pub async fn latest_for_repo(
    pool: &PgPool,
    repo_id: Uuid,
) -> sqlx::Result<Option<AnalysisResultRecord>> {
    sqlx::query_as::<_, AnalysisResultRecord>(
        r#"
        SELECT * FROM analysis_results
        WHERE repo_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(repo_id)
    .fetch_optional(pool)
    .await
}
