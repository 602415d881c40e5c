//! API key gateway

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::ApiKeyRecord;

pub async fn insert(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    key_prefix: &str,
    key_last4: &str,
    key_hash: &str,
    expires_at: Option<DateTime<Utc>>,
) -> sqlx::Result<ApiKeyRecord> {
    sqlx::query_as::<_, ApiKeyRecord>(
        r#"
        INSERT INTO api_keys (id, user_id, name, key_prefix, key_last4, key_hash, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(name)
    .bind(key_prefix)
    .bind(key_last4)
    .bind(key_hash)
    .bind(expires_at)
    .fetch_one(pool)
    .await
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Vec<ApiKeyRecord>> {
    sqlx::query_as::<_, ApiKeyRecord>(
        "SELECT * FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn find_owned(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
) -> sqlx::Result<Option<ApiKeyRecord>> {
    sqlx::query_as::<_, ApiKeyRecord>("SELECT * FROM api_keys WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn revoke(pool: &PgPool, id: Uuid) -> sqlx::Result<()> {
    sqlx::query("UPDATE api_keys SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
