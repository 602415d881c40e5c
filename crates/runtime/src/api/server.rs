//! Router assembly and server startup

use std::net::SocketAddr;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use super::errors::ApiError;
use super::middleware::{observability_middleware, rate_limit_middleware};
use super::routes::{api_keys, auth, chat, export, health, repos};
use super::types::{
    AnalyzeRepoResponse, ApiKeyCreateResponse, ApiKeyListItem, ApiKeyListResponse,
    ChatMessageResponse, ChatSessionListItem, ChatSessionListResponse, ChatSessionResponse,
    CreateApiKeyRequest, CreateChatSessionRequest, CreateChatSessionResponse, CurrentUserResponse,
    DashboardRepository, DashboardResponse, DepsHealthResponse, ErrorBody, ErrorEnvelope,
    HealthResponse, HybridSearchChunk, HybridSearchResponse, LexicalSearchChunk,
    LexicalSearchResponse, RefreshAccessTokenResponse, SendMessageRequest, ShareCreateRequest,
    ShareCreateResponse, SharedAnalysisResponse, SuggestedQuestionsResponse,
    AnalyzeRepoRequest,
};
use super::AppState;
use crate::config::Config;
use crate::types::RuntimeError;

/// OpenAPI documentation, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        auth::auth_github,
        auth::auth_callback,
        auth::refresh,
        auth::logout,
        auth::me,
        api_keys::create_api_key,
        api_keys::list_api_keys,
        api_keys::revoke_api_key,
        repos::analyze_repo,
        repos::stream_status,
        repos::dashboard,
        repos::search_lexical,
        repos::search_hybrid,
        repos::dependency_graph,
        chat::list_sessions,
        chat::create_session,
        chat::get_session,
        chat::delete_session,
        chat::suggested_questions,
        chat::send_message,
        export::create_share_link,
        export::revoke_share_link,
        export::get_shared_analysis,
        health::health,
        health::health_deps,
    ),
    components(schemas(
        ErrorBody,
        ErrorEnvelope,
        AnalyzeRepoRequest,
        AnalyzeRepoResponse,
        LexicalSearchChunk,
        LexicalSearchResponse,
        HybridSearchChunk,
        HybridSearchResponse,
        DashboardRepository,
        DashboardResponse,
        RefreshAccessTokenResponse,
        CurrentUserResponse,
        CreateApiKeyRequest,
        ApiKeyCreateResponse,
        ApiKeyListItem,
        ApiKeyListResponse,
        CreateChatSessionRequest,
        CreateChatSessionResponse,
        ChatMessageResponse,
        ChatSessionResponse,
        ChatSessionListItem,
        ChatSessionListResponse,
        SuggestedQuestionsResponse,
        SendMessageRequest,
        ShareCreateRequest,
        ShareCreateResponse,
        SharedAnalysisResponse,
        HealthResponse,
        DepsHealthResponse,
    )),
    tags(
        (name = "auth", description = "OAuth, sessions, and API keys"),
        (name = "repos", description = "Analysis jobs, search, and dashboards"),
        (name = "chat", description = "Repository chat with citations"),
        (name = "export", description = "Share link management"),
        (name = "share", description = "Public share resolution"),
        (name = "system", description = "Health and observability")
    ),
    info(
        title = "DevLens API",
        description = "Repository analysis pipeline, retrieval engine, and share links",
        version = "1.0.0"
    )
)]
pub struct ApiDoc;

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Assemble the full application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/github", get(auth::auth_github))
        .route("/auth/callback", get(auth::auth_callback))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", delete(auth::logout))
        .route("/auth/me", get(auth::me))
        .route(
            "/auth/api-keys",
            get(api_keys::list_api_keys).post(api_keys::create_api_key),
        )
        .route("/auth/api-keys/:api_key_id", delete(api_keys::revoke_api_key))
        .route("/repos/analyze", post(repos::analyze_repo))
        .route("/repos/:repo_id/status", get(repos::stream_status))
        .route("/repos/:repo_id/dashboard", get(repos::dashboard))
        .route("/repos/:repo_id/search/lexical", get(repos::search_lexical))
        .route("/repos/:repo_id/search/hybrid", get(repos::search_hybrid))
        .route("/repos/:repo_id/graph", get(repos::dependency_graph))
        .route(
            "/chat/sessions",
            get(chat::list_sessions).post(chat::create_session),
        )
        .route(
            "/chat/sessions/:session_id",
            get(chat::get_session).delete(chat::delete_session),
        )
        .route("/chat/sessions/:session_id/message", post(chat::send_message))
        .route("/chat/repos/:repo_id/suggestions", get(chat::suggested_questions))
        .route("/export/:repo_id/share", post(export::create_share_link))
        .route("/export/share/:share_id", delete(export::revoke_share_link))
        .route("/share/:token", get(export::get_shared_analysis));

    let cors = build_cors(&state.config);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health::health))
        .route("/health/deps", get(health::health_deps))
        .route("/metrics", get(health::metrics))
        .route("/api-docs/openapi.json", get(openapi))
        .fallback(|| async { ApiError::not_found("Not found") })
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn build_cors(config: &Config) -> CorsLayer {
    let origin = config
        .frontend_url
        .trim_end_matches('/')
        .parse::<HeaderValue>()
        .unwrap_or_else(|_| HeaderValue::from_static("http://localhost:3000"));

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-csrf-token"),
            header::HeaderName::from_static("x-trace-id"),
            header::HeaderName::from_static("idempotency-key"),
        ])
        .allow_credentials(true)
}

/// Bind and serve the API until the process is terminated.
pub async fn serve(config: Config) -> Result<(), RuntimeError> {
    let state = AppState::from_config(config).await?;
    let addr = format!(
        "{}:{}",
        state.config.api.bind_address, state.config.api.port
    );
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| RuntimeError::Internal(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("HTTP API server starting on {}", addr);

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| RuntimeError::Internal(format!("Server error: {e}")))?;

    Ok(())
}
