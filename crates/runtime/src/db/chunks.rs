//! Code chunk gateway
//!
//! The chunk rewrite is the hot write path of the parsing stage: delete and
//! reinsert inside one transaction so a half-parsed repo never persists.
//! The `fts` column is maintained by a trigger; inserts never touch it.

use sqlx::PgPool;
use uuid::Uuid;

use super::models::CodeChunkRecord;

/// A chunk produced by the parsing stage, prior to insertion.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub id: Uuid,
    pub file_path: String,
    pub start_line: i32,
    pub end_line: i32,
    pub content: String,
    pub language: String,
}

/// Atomically replace the full chunk set of a repository.
pub async fn replace_for_repo(pool: &PgPool, repo_id: Uuid, chunks: &[NewChunk]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM code_chunks WHERE repo_id = $1")
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;

    if !chunks.is_empty() {
        let ids: Vec<Uuid> = chunks.iter().map(|c| c.id).collect();
        let paths: Vec<String> = chunks.iter().map(|c| c.file_path.clone()).collect();
        let starts: Vec<i32> = chunks.iter().map(|c| c.start_line).collect();
        let ends: Vec<i32> = chunks.iter().map(|c| c.end_line).collect();
        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let languages: Vec<String> = chunks.iter().map(|c| c.language.clone()).collect();

        sqlx::query(
            r#"
            INSERT INTO code_chunks (id, repo_id, file_path, start_line, end_line, content, language)
            SELECT u.id, $1, u.file_path, u.start_line, u.end_line, u.content, u.language
            FROM UNNEST($2::uuid[], $3::text[], $4::int4[], $5::int4[], $6::text[], $7::text[])
                 AS u(id, file_path, start_line, end_line, content, language)
            "#,
        )
        .bind(repo_id)
        .bind(&ids)
        .bind(&paths)
        .bind(&starts)
        .bind(&ends)
        .bind(&contents)
        .bind(&languages)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// All chunks of a repository in insertion order.
pub async fn load_for_repo(pool: &PgPool, repo_id: Uuid) -> sqlx::Result<Vec<CodeChunkRecord>> {
    sqlx::query_as::<_, CodeChunkRecord>(
        r#"
        SELECT * FROM code_chunks
        WHERE repo_id = $1
        ORDER BY created_at ASC, file_path ASC, start_line ASC
        "#,
    )
    .bind(repo_id)
    .fetch_all(pool)
    .await
}

/// Write vector-store point ids back after a successful upsert batch.
pub async fn set_point_ids(pool: &PgPool, pairs: &[(Uuid, Uuid)]) -> sqlx::Result<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let chunk_ids: Vec<Uuid> = pairs.iter().map(|(chunk, _)| *chunk).collect();
    let point_ids: Vec<Uuid> = pairs.iter().map(|(_, point)| *point).collect();

    sqlx::query(
        r#"
        UPDATE code_chunks c
        SET qdrant_point_id = u.point_id
        FROM UNNEST($1::uuid[], $2::uuid[]) AS u(chunk_id, point_id)
        WHERE c.id = u.chunk_id
        "#,
    )
    .bind(&chunk_ids)
    .bind(&point_ids)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch a chunk scoped to its owning repository (citation validation).
pub async fn find_scoped(
    pool: &PgPool,
    chunk_id: Uuid,
    repo_id: Uuid,
) -> sqlx::Result<Option<CodeChunkRecord>> {
    sqlx::query_as::<_, CodeChunkRecord>(
        "SELECT * FROM code_chunks WHERE id = $1 AND repo_id = $2 LIMIT 1",
    )
    .bind(chunk_id)
    .bind(repo_id)
    .fetch_optional(pool)
    .await
}

/// First distinct file paths of a repository, alphabetically.
pub async fn distinct_paths(pool: &PgPool, repo_id: Uuid, limit: i64) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar(
        r#"
        SELECT DISTINCT file_path FROM code_chunks
        WHERE repo_id = $1
        ORDER BY file_path ASC
        LIMIT $2
        "#,
    )
    .bind(repo_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
