//! Share links: mint, revoke, and public resolution
//!
//! A share link is valid only when the signed token and the persisted row
//! agree: audience, typ, jti lookup, repo binding, revocation, and expiry.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::api::errors::{ApiError, ApiResult};
use crate::api::extract::{ApiJson, ApiPath, CurrentUser};
use crate::api::types::{ShareCreateRequest, ShareCreateResponse, SharedAnalysisResponse};
use crate::api::AppState;
use crate::auth::share::{create_share_token, decode_share_token, share_token_expiry};
use crate::db::models::{AnalysisResultRecord, RepositoryRecord};
use crate::db::{repositories, results, share_tokens};

async fn repo_or_404(state: &AppState, repo_id: Uuid) -> Result<RepositoryRecord, ApiError> {
    repositories::find_by_id(&state.pool, repo_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Repository not found"))
}

async fn latest_result_or_404(
    state: &AppState,
    repo_id: Uuid,
) -> Result<AnalysisResultRecord, ApiError> {
    results::latest_for_repo(&state.pool, repo_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Analysis result not found"))
}

/// Mint a signed, time-bounded public share link for a repository.
#[utoipa::path(
    post,
    path = "/api/v1/export/{repo_id}/share",
    params(("repo_id" = Uuid, Path, description = "Repository id")),
    request_body = ShareCreateRequest,
    responses(
        (status = 200, description = "Share link created", body = ShareCreateResponse),
        (status = 401, description = "Unauthorized", body = crate::api::types::ErrorEnvelope),
        (status = 404, description = "Repository or result not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "export"
)]
pub async fn create_share_link(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(repo_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<ShareCreateRequest>,
) -> ApiResult<Json<ShareCreateResponse>> {
    repo_or_404(&state, repo_id).await?;
    latest_result_or_404(&state, repo_id).await?;

    let share_id = Uuid::new_v4();
    let expires_at = share_token_expiry(&state.config.auth, request.ttl_days)?;
    let token = create_share_token(&state.config.auth, repo_id, share_id, expires_at)?;

    share_tokens::insert(&state.pool, share_id, repo_id, user.id, expires_at).await?;

    let share_url = format!(
        "{}/share/{token}",
        state.config.frontend_url.trim_end_matches('/')
    );
    Ok(Json(ShareCreateResponse {
        share_id: share_id.to_string(),
        share_token: token,
        share_url,
        expires_at,
    }))
}

/// Revoke an existing share link owned by the caller.
#[utoipa::path(
    delete,
    path = "/api/v1/export/share/{share_id}",
    params(("share_id" = Uuid, Path, description = "Share id")),
    responses(
        (status = 204, description = "Revoked"),
        (status = 404, description = "Share token not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "export"
)]
pub async fn revoke_share_link(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(share_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    let row = share_tokens::find_by_id(&state.pool, share_id)
        .await?
        .filter(|row| row.user_id == user.id)
        .ok_or_else(|| ApiError::not_found("Share token not found"))?;

    if row.revoked_at.is_none() {
        share_tokens::revoke(&state.pool, row.id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Resolve a public share token into the shared analysis payload.
#[utoipa::path(
    get,
    path = "/api/v1/share/{token}",
    params(("token" = String, Path, description = "Signed share token")),
    responses(
        (status = 200, description = "Shared analysis", body = SharedAnalysisResponse),
        (status = 401, description = "Invalid, revoked, or expired share token", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "share"
)]
pub async fn get_shared_analysis(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
) -> ApiResult<Json<SharedAnalysisResponse>> {
    let claims = decode_share_token(&state.config.auth, &token)?;

    let share_id = Uuid::parse_str(&claims.jti)
        .map_err(|_| ApiError::unauthorized("Invalid share token payload"))?;
    let repo_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::unauthorized("Invalid share token payload"))?;

    let row = share_tokens::find_by_id(&state.pool, share_id)
        .await?
        .filter(|row| row.repo_id == repo_id)
        .ok_or_else(|| ApiError::unauthorized("Invalid share token"))?;
    if row.revoked_at.is_some() {
        return Err(ApiError::unauthorized("Share token revoked"));
    }
    if row.expires_at <= chrono::Utc::now() {
        return Err(ApiError::unauthorized("Share token expired"));
    }

    let repo = repo_or_404(&state, repo_id).await?;
    let result = latest_result_or_404(&state, repo_id).await?;

    Ok(Json(SharedAnalysisResponse {
        repo_id: repo.id.to_string(),
        repository: serde_json::json!({
            "github_url": repo.github_url,
            "full_name": repo.full_name,
            "owner": repo.owner,
            "name": repo.name,
            "description": repo.description,
            "stars": repo.stars,
            "forks": repo.forks,
            "language": repo.language,
            "default_branch": repo.default_branch,
            "latest_commit_sha": repo.latest_commit_sha,
        }),
        analysis: serde_json::json!({
            "quality_score": result.quality_score,
            "architecture_summary": result.architecture_summary,
            "language_breakdown": result.language_breakdown.unwrap_or_else(|| serde_json::json!({})),
            "contributor_stats": result.contributor_stats.unwrap_or_else(|| serde_json::json!({})),
            "tech_debt_flags": result.tech_debt_flags.unwrap_or_else(|| serde_json::json!({})),
            "file_tree": result.file_tree.unwrap_or_else(|| serde_json::json!({})),
        }),
        shared_at: row.created_at,
        expires_at: row.expires_at,
    }))
}
