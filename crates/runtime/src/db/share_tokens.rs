//! Share token gateway

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::ShareTokenRecord;

pub async fn insert(
    pool: &PgPool,
    id: Uuid,
    repo_id: Uuid,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
) -> sqlx::Result<ShareTokenRecord> {
    sqlx::query_as::<_, ShareTokenRecord>(
        r#"
        INSERT INTO share_tokens (id, repo_id, user_id, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(repo_id)
    .bind(user_id)
    .bind(expires_at)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<ShareTokenRecord>> {
    sqlx::query_as::<_, ShareTokenRecord>("SELECT * FROM share_tokens WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn revoke(pool: &PgPool, id: Uuid) -> sqlx::Result<()> {
    sqlx::query("UPDATE share_tokens SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
