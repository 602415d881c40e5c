//! Chat sessions over indexed repositories
//!
//! The assistant line is deterministic: it names the validated citation
//! anchors found by hybrid search. Ownership failures collapse to 404.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::api::errors::{ApiError, ApiResult};
use crate::api::extract::{ApiJson, ApiPath, ApiQuery, CurrentUser};
use crate::api::sse;
use crate::api::types::{
    ChatMessageResponse, ChatSessionListItem, ChatSessionListResponse, ChatSessionResponse,
    CitationEnvelope, CreateChatSessionRequest, CreateChatSessionResponse, SendMessageRequest,
    SessionListQuery, SuggestedQuestionsResponse, SuggestionsQuery,
};
use crate::api::AppState;
use crate::db::models::ChatSessionRecord;
use crate::db::{chat, chunks, repositories};
use crate::retrieval::citations::{format_citation, validate_for_repo, Citation};
use crate::retrieval::hybrid::{self, HybridHit};

const DEFAULT_TOP_K: usize = 5;

async fn owned_session_or_404(
    state: &AppState,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<ChatSessionRecord, ApiError> {
    chat::find_session(&state.pool, session_id)
        .await?
        .filter(|session| session.user_id == user_id)
        .ok_or_else(|| ApiError::not_found("Chat session not found"))
}

/// Render the assistant reply and its citation envelope from search hits.
fn render_assistant_response(valid: &[Citation], had_results: bool) -> (String, CitationEnvelope) {
    if !had_results {
        return (
            "I could not find relevant indexed code context for that query.".to_string(),
            CitationEnvelope {
                citations: Vec::new(),
                no_citation: true,
            },
        );
    }

    let refs: Vec<String> = valid
        .iter()
        .map(|c| format!("{}:{}", c.file_path, c.line_start))
        .collect();
    let refs = if refs.is_empty() {
        vec!["no exact anchor".to_string()]
    } else {
        refs
    };

    (
        format!("Relevant code was found in: {}.", refs.join(", ")),
        CitationEnvelope {
            citations: valid.to_vec(),
            no_citation: valid.is_empty(),
        },
    )
}

fn citations_from_hits(hits: &[HybridHit]) -> Vec<Citation> {
    hits.iter()
        .take(3)
        .map(|hit| {
            format_citation(
                &hit.chunk_id.to_string(),
                hit.file_path.as_deref().unwrap_or(""),
                hit.start_line,
                hit.end_line,
                Some(hit.rerank_score),
            )
        })
        .collect()
}

/// List the caller's chat sessions, optionally scoped to one repository.
#[utoipa::path(
    get,
    path = "/api/v1/chat/sessions",
    params(SessionListQuery),
    responses(
        (status = 200, description = "Sessions for the current user", body = ChatSessionListResponse),
        (status = 401, description = "Unauthorized", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "chat"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<SessionListQuery>,
) -> ApiResult<Json<ChatSessionListResponse>> {
    let sessions = chat::list_sessions(&state.pool, user.id, query.repo_id).await?;

    let mut items = Vec::with_capacity(sessions.len());
    for session in sessions {
        let (message_count, last_message_preview) =
            chat::session_digest(&state.pool, session.id).await?;
        items.push(ChatSessionListItem {
            id: session.id.to_string(),
            repo_id: session.repo_id.to_string(),
            created_at: session.created_at,
            message_count,
            last_message_preview,
        });
    }

    Ok(Json(ChatSessionListResponse { sessions: items }))
}

/// Create a chat session against an analyzed repository.
#[utoipa::path(
    post,
    path = "/api/v1/chat/sessions",
    request_body = CreateChatSessionRequest,
    responses(
        (status = 200, description = "Session created", body = CreateChatSessionResponse),
        (status = 400, description = "Invalid repo id", body = crate::api::types::ErrorEnvelope),
        (status = 404, description = "Repository not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "chat"
)]
pub async fn create_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(request): ApiJson<CreateChatSessionRequest>,
) -> ApiResult<Json<CreateChatSessionResponse>> {
    let repo_id = Uuid::parse_str(&request.repo_id)
        .map_err(|_| ApiError::bad_request("Invalid repo_id"))?;
    let repo = repositories::find_by_id(&state.pool, repo_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Repository not found"))?;

    let session = chat::create_session(&state.pool, repo.id, user.id).await?;
    Ok(Json(CreateChatSessionResponse {
        session_id: session.id.to_string(),
        repo_id: session.repo_id.to_string(),
        created_at: session.created_at,
    }))
}

/// Session with full message history.
#[utoipa::path(
    get,
    path = "/api/v1/chat/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session with messages", body = ChatSessionResponse),
        (status = 404, description = "Session not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "chat"
)]
pub async fn get_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(session_id): ApiPath<Uuid>,
) -> ApiResult<Json<ChatSessionResponse>> {
    let session = owned_session_or_404(&state, session_id, user.id).await?;
    let messages = chat::list_messages(&state.pool, session.id).await?;

    Ok(Json(ChatSessionResponse {
        id: session.id.to_string(),
        repo_id: session.repo_id.to_string(),
        user_id: session.user_id.to_string(),
        created_at: session.created_at,
        messages: messages
            .into_iter()
            .map(|message| ChatMessageResponse {
                id: message.id.to_string(),
                role: message.role,
                content: message.content,
                source_citations: message.source_citations,
                created_at: message.created_at,
            })
            .collect(),
    }))
}

/// Delete a session and its messages.
#[utoipa::path(
    delete,
    path = "/api/v1/chat/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Session not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "chat"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(session_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    let session = owned_session_or_404(&state, session_id, user.id).await?;
    chat::delete_session(&state.pool, session.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Canned plus per-file suggested questions for a repository.
#[utoipa::path(
    get,
    path = "/api/v1/chat/repos/{repo_id}/suggestions",
    params(("repo_id" = Uuid, Path, description = "Repository id"), SuggestionsQuery),
    responses(
        (status = 200, description = "Suggested questions", body = SuggestedQuestionsResponse),
        (status = 404, description = "Repository not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "chat"
)]
pub async fn suggested_questions(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    ApiPath(repo_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<SuggestionsQuery>,
) -> ApiResult<Json<SuggestedQuestionsResponse>> {
    repositories::find_by_id(&state.pool, repo_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Repository not found"))?;

    let limit = query.limit.unwrap_or(DEFAULT_TOP_K).clamp(1, 10);
    let files = chunks::distinct_paths(&state.pool, repo_id, 3).await?;

    let mut suggestions = vec![
        "What are the main architecture components in this repository?".to_string(),
        "Where is authentication and token handling implemented?".to_string(),
        "Which files show the core business logic flow?".to_string(),
    ];
    for path in files {
        suggestions.push(format!("Explain the responsibilities of `{path}`."));
    }
    suggestions.truncate(limit);

    Ok(Json(SuggestedQuestionsResponse {
        repo_id: repo_id.to_string(),
        suggestions,
    }))
}

/// Persist the user message, retrieve context, persist the assistant reply,
/// and stream it back as `delta` events followed by `done`.
#[utoipa::path(
    post,
    path = "/api/v1/chat/sessions/{session_id}/message",
    params(("session_id" = Uuid, Path, description = "Session id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "text/event-stream of delta events then done"),
        (status = 400, description = "Empty message", body = crate::api::types::ErrorEnvelope),
        (status = 404, description = "Session not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "chat"
)]
pub async fn send_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(session_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<SendMessageRequest>,
) -> ApiResult<Response> {
    let content = request.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("Message content must not be empty"));
    }

    let session = owned_session_or_404(&state, session_id, user.id).await?;

    chat::insert_message(&state.pool, session.id, "user", &content, None).await?;

    let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
    let hits = hybrid::search(
        &state.pool,
        &state.qdrant,
        &state.config.database.qdrant_collection,
        state.config.embed.vector_size,
        session.repo_id,
        &content,
        top_k,
    )
    .await?;

    let formatted = citations_from_hits(&hits);
    let valid = validate_for_repo(&state.pool, session.repo_id, &formatted).await?;
    let (assistant_text, envelope) = render_assistant_response(&valid, !hits.is_empty());

    let envelope_json = serde_json::to_value(&envelope).unwrap_or(serde_json::Value::Null);
    let assistant = chat::insert_message(
        &state.pool,
        session.id,
        "assistant",
        &assistant_text,
        Some(&envelope_json),
    )
    .await?;

    let done_payload = serde_json::json!({
        "message_id": assistant.id.to_string(),
        "citations": envelope.citations,
        "no_citation": envelope.no_citation,
    });

    Ok(sse::chat_message_stream(assistant_text, done_payload).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(path: &str, start: i32) -> Citation {
        format_citation("00000000-0000-0000-0000-000000000001", path, Some(start), Some(start + 10), Some(0.5))
    }

    #[test]
    fn empty_search_yields_the_no_context_line() {
        let (text, envelope) = render_assistant_response(&[], false);
        assert_eq!(
            text,
            "I could not find relevant indexed code context for that query."
        );
        assert!(envelope.no_citation);
        assert!(envelope.citations.is_empty());
    }

    #[test]
    fn valid_citations_are_listed_in_the_reply() {
        let valid = vec![citation("src/auth/tokens.rs", 12), citation("src/lib.rs", 1)];
        let (text, envelope) = render_assistant_response(&valid, true);
        assert_eq!(
            text,
            "Relevant code was found in: src/auth/tokens.rs:12, src/lib.rs:1."
        );
        assert!(!envelope.no_citation);
        assert_eq!(envelope.citations.len(), 2);
    }

    #[test]
    fn results_without_surviving_citations_note_no_anchor() {
        let (text, envelope) = render_assistant_response(&[], true);
        assert_eq!(text, "Relevant code was found in: no exact anchor.");
        assert!(envelope.no_citation);
    }
}
