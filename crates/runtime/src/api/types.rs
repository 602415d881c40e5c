//! Request and response types for the HTTP API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::retrieval::Citation;

// ---------------------------------------------------------------------------
// Error envelope (documentation schema)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

// ---------------------------------------------------------------------------
// Repos
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeRepoRequest {
    #[schema(example = "https://github.com/owner/repo")]
    pub github_url: String,
    #[serde(default)]
    pub force_reanalyze: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyzeRepoResponse {
    pub job_id: String,
    pub repo_id: String,
    pub status: String,
    pub cache_hit: bool,
    pub commit_sha: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatusQuery {
    pub once: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LexicalSearchChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub language: Option<String>,
    pub score: f32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LexicalSearchResponse {
    pub repo_id: String,
    pub query: String,
    pub total: usize,
    pub results: Vec<LexicalSearchChunk>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HybridSearchChunk {
    pub chunk_id: String,
    pub file_path: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub language: Option<String>,
    pub dense_score: f64,
    pub lexical_score: f64,
    pub rerank_score: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HybridSearchResponse {
    pub repo_id: String,
    pub query: String,
    pub total: usize,
    pub results: Vec<HybridSearchChunk>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardRepository {
    pub id: String,
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
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardResponse {
    pub repo_id: String,
    pub repository: DashboardRepository,
    pub analysis: Option<Value>,
    pub has_analysis: bool,
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuthGithubQuery {
    /// Frontend-relative path to land on after login.
    pub next: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshAccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in_seconds: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentUserResponse {
    pub id: String,
    pub github_id: i64,
    pub username: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

// ---------------------------------------------------------------------------
// API keys
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyCreateResponse {
    pub id: String,
    pub name: String,
    /// The raw key; returned exactly once.
    pub api_key: String,
    pub key_prefix: String,
    pub key_last4: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyListItem {
    pub id: String,
    pub name: String,
    pub key_prefix: String,
    pub key_last4: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyListResponse {
    pub items: Vec<ApiKeyListItem>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateChatSessionRequest {
    pub repo_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateChatSessionResponse {
    pub session_id: String,
    pub repo_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatMessageResponse {
    pub id: String,
    pub role: String,
    pub content: String,
    pub source_citations: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatSessionResponse {
    pub id: String,
    pub repo_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<ChatMessageResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatSessionListItem {
    pub id: String,
    pub repo_id: String,
    pub created_at: DateTime<Utc>,
    pub message_count: i64,
    pub last_message_preview: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatSessionListResponse {
    pub sessions: Vec<ChatSessionListItem>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SessionListQuery {
    pub repo_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SuggestionsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuggestedQuestionsResponse {
    pub repo_id: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub content: String,
    pub top_k: Option<usize>,
}

/// The JSON stored in `chat_messages.source_citations` and echoed in the
/// terminal SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationEnvelope {
    pub citations: Vec<Citation>,
    pub no_citation: bool,
}

// ---------------------------------------------------------------------------
// Share links
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ShareCreateRequest {
    pub ttl_days: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShareCreateResponse {
    pub share_id: String,
    pub share_token: String,
    pub share_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SharedAnalysisResponse {
    pub repo_id: String,
    pub repository: Value,
    pub analysis: Value,
    pub shared_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub env: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DepsHealthResponse {
    pub redis: bool,
    pub postgres: bool,
    pub qdrant: bool,
    pub all_healthy: bool,
}
