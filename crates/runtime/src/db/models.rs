//! Row types for the DevLens schema

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub github_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RepositoryRecord {
    pub id: Uuid,
    pub github_url: String,
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub latest_commit_sha: Option<String>,
    pub description: Option<String>,
    pub stars: Option<i32>,
    pub forks: Option<i32>,
    pub language: Option<String>,
    pub size_kb: Option<i32>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AnalysisJobRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub user_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub commit_sha: String,
    pub status: String,
    pub progress: i32,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AnalysisResultRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub job_id: Uuid,
    pub architecture_summary: Option<String>,
    pub quality_score: Option<i32>,
    pub language_breakdown: Option<Value>,
    pub contributor_stats: Option<Value>,
    pub tech_debt_flags: Option<Value>,
    pub file_tree: Option<Value>,
    pub cache_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CodeChunkRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub file_path: String,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub content: String,
    pub language: Option<String>,
    pub qdrant_point_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatSessionRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatMessageRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    pub source_citations: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ShareTokenRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub key_last4: String,
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DeadLetterJobRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub repo_id: Uuid,
    pub stage: String,
    pub error_code: String,
    pub error_message: String,
    pub attempt_count: i32,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}
