//! Repository gateway

use sqlx::PgPool;
use uuid::Uuid;

use super::models::RepositoryRecord;
use crate::github::RepoSnapshot;

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<RepositoryRecord>> {
    sqlx::query_as::<_, RepositoryRecord>("SELECT * FROM repositories WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Upsert the repository row from a freshly resolved provider snapshot.
///
/// Keyed by `full_name`; every analyze call refreshes the metadata columns.
pub async fn upsert_snapshot(pool: &PgPool, snapshot: &RepoSnapshot) -> sqlx::Result<RepositoryRecord> {
    sqlx::query_as::<_, RepositoryRecord>(
        r#"
        INSERT INTO repositories (
            id, github_url, full_name, owner, name, default_branch,
            latest_commit_sha, description, stars, forks, language, size_kb
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (full_name) DO UPDATE
        SET github_url = EXCLUDED.github_url,
            owner = EXCLUDED.owner,
            name = EXCLUDED.name,
            default_branch = EXCLUDED.default_branch,
            latest_commit_sha = EXCLUDED.latest_commit_sha,
            description = EXCLUDED.description,
            stars = EXCLUDED.stars,
            forks = EXCLUDED.forks,
            language = EXCLUDED.language,
            size_kb = EXCLUDED.size_kb
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&snapshot.github_url)
    .bind(&snapshot.full_name)
    .bind(&snapshot.owner)
    .bind(&snapshot.name)
    .bind(&snapshot.default_branch)
    .bind(&snapshot.commit_sha)
    .bind(&snapshot.description)
    .bind(snapshot.stars)
    .bind(snapshot.forks)
    .bind(&snapshot.language)
    .bind(snapshot.size_kb)
    .fetch_one(pool)
    .await
}

/// Stamp the repository after a successful analysis run.
pub async fn mark_analyzed(pool: &PgPool, repo_id: Uuid) -> sqlx::Result<()> {
    sqlx::query("UPDATE repositories SET last_analyzed_at = NOW() WHERE id = $1")
        .bind(repo_id)
        .execute(pool)
        .await?;
    Ok(())
}
