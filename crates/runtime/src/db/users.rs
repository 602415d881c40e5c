//! User gateway

use sqlx::PgPool;
use uuid::Uuid;

use super::models::UserRecord;

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<UserRecord>> {
    sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_github_id(pool: &PgPool, github_id: i64) -> sqlx::Result<Option<UserRecord>> {
    sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE github_id = $1")
        .bind(github_id)
        .fetch_optional(pool)
        .await
}

/// Insert or refresh the user row for a GitHub profile.
pub async fn upsert_github_user(
    pool: &PgPool,
    github_id: i64,
    username: &str,
    email: Option<&str>,
    avatar_url: Option<&str>,
) -> sqlx::Result<UserRecord> {
    sqlx::query_as::<_, UserRecord>(
        r#"
        INSERT INTO users (id, github_id, username, email, avatar_url)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (github_id) DO UPDATE
        SET username = EXCLUDED.username,
            email = EXCLUDED.email,
            avatar_url = EXCLUDED.avatar_url,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(github_id)
    .bind(username)
    .bind(email)
    .bind(avatar_url)
    .fetch_one(pool)
    .await
}
