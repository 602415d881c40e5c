//! Chat session and message gateway

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{ChatMessageRecord, ChatSessionRecord};

pub async fn create_session(
    pool: &PgPool,
    repo_id: Uuid,
    user_id: Uuid,
) -> sqlx::Result<ChatSessionRecord> {
    sqlx::query_as::<_, ChatSessionRecord>(
        r#"
        INSERT INTO chat_sessions (id, repo_id, user_id)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(repo_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
}

pub async fn find_session(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<ChatSessionRecord>> {
    sqlx::query_as::<_, ChatSessionRecord>("SELECT * FROM chat_sessions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_sessions(
    pool: &PgPool,
    user_id: Uuid,
    repo_id: Option<Uuid>,
) -> sqlx::Result<Vec<ChatSessionRecord>> {
    sqlx::query_as::<_, ChatSessionRecord>(
        r#"
        SELECT * FROM chat_sessions
        WHERE user_id = $1
          AND ($2::uuid IS NULL OR repo_id = $2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(repo_id)
    .fetch_all(pool)
    .await
}

/// Session deletion cascades messages.
pub async fn delete_session(pool: &PgPool, id: Uuid) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chat_messages WHERE session_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chat_sessions WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

pub async fn insert_message(
    pool: &PgPool,
    session_id: Uuid,
    role: &str,
    content: &str,
    source_citations: Option<&Value>,
) -> sqlx::Result<ChatMessageRecord> {
    sqlx::query_as::<_, ChatMessageRecord>(
        r#"
        INSERT INTO chat_messages (id, session_id, role, content, source_citations)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(session_id)
    .bind(role)
    .bind(content)
    .bind(source_citations)
    .fetch_one(pool)
    .await
}

pub async fn list_messages(pool: &PgPool, session_id: Uuid) -> sqlx::Result<Vec<ChatMessageRecord>> {
    sqlx::query_as::<_, ChatMessageRecord>(
        "SELECT * FROM chat_messages WHERE session_id = $1 ORDER BY created_at ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}

/// Message count and newest message preview for the session list view.
pub async fn session_digest(pool: &PgPool, session_id: Uuid) -> sqlx::Result<(i64, Option<String>)> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = $1")
        .bind(session_id)
        .fetch_one(pool)
        .await?;
    let preview: Option<String> = sqlx::query_scalar(
        r#"
        SELECT LEFT(content, 120) FROM chat_messages
        WHERE session_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    Ok((count, preview))
}
