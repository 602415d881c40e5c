//! API key management

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::api::errors::{ApiError, ApiResult};
use crate::api::extract::{ApiJson, ApiPath, CurrentUser};
use crate::api::types::{ApiKeyCreateResponse, ApiKeyListItem, ApiKeyListResponse, CreateApiKeyRequest};
use crate::api::AppState;
use crate::auth::api_keys::issue_api_key;
use crate::db::api_keys;

fn validate_create(request: &CreateApiKeyRequest) -> Result<(), ApiError> {
    let mut errors = Vec::new();
    let name = request.name.trim();
    if name.len() < 3 || name.len() > 255 {
        errors.push(json!({
            "field": "name",
            "message": "name must be between 3 and 255 characters",
        }));
    }
    if let Some(days) = request.expires_in_days {
        if !(1..=365).contains(&days) {
            errors.push(json!({
                "field": "expires_in_days",
                "message": "expires_in_days must be between 1 and 365",
            }));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(errors))
    }
}

/// Issue a new API key; the raw value appears only in this response.
#[utoipa::path(
    post,
    path = "/api/v1/auth/api-keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 200, description = "Key issued", body = ApiKeyCreateResponse),
        (status = 401, description = "Unauthorized", body = crate::api::types::ErrorEnvelope),
        (status = 422, description = "Validation failed", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn create_api_key(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(request): ApiJson<CreateApiKeyRequest>,
) -> ApiResult<Json<ApiKeyCreateResponse>> {
    validate_create(&request)?;

    let issued = issue_api_key();
    let expires_at = request
        .expires_in_days
        .map(|days| Utc::now() + Duration::days(days));

    let row = api_keys::insert(
        &state.pool,
        user.id,
        request.name.trim(),
        &issued.key_prefix,
        &issued.key_last4,
        &issued.key_hash,
        expires_at,
    )
    .await?;

    Ok(Json(ApiKeyCreateResponse {
        id: row.id.to_string(),
        name: row.name,
        api_key: issued.raw_key,
        key_prefix: row.key_prefix,
        key_last4: row.key_last4,
        created_at: row.created_at,
        expires_at: row.expires_at,
    }))
}

/// List the caller's keys (never including raw values).
#[utoipa::path(
    get,
    path = "/api/v1/auth/api-keys",
    responses(
        (status = 200, description = "Keys for the current user", body = ApiKeyListResponse),
        (status = 401, description = "Unauthorized", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn list_api_keys(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<ApiKeyListResponse>> {
    let rows = api_keys::list_for_user(&state.pool, user.id).await?;
    Ok(Json(ApiKeyListResponse {
        items: rows
            .into_iter()
            .map(|row| ApiKeyListItem {
                id: row.id.to_string(),
                name: row.name,
                key_prefix: row.key_prefix,
                key_last4: row.key_last4,
                created_at: row.created_at,
                revoked_at: row.revoked_at,
                last_used_at: row.last_used_at,
                expires_at: row.expires_at,
            })
            .collect(),
    }))
}

/// Revoke a key owned by the caller.
#[utoipa::path(
    delete,
    path = "/api/v1/auth/api-keys/{api_key_id}",
    params(("api_key_id" = Uuid, Path, description = "Key to revoke")),
    responses(
        (status = 204, description = "Revoked"),
        (status = 404, description = "Key not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn revoke_api_key(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(api_key_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    let row = api_keys::find_owned(&state.pool, api_key_id, user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("API key not found"))?;

    if row.revoked_at.is_none() {
        api_keys::revoke(&state.pool, row.id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_validation_bounds() {
        let ok = CreateApiKeyRequest {
            name: "ci-deploy".to_string(),
            expires_in_days: Some(30),
        };
        assert!(validate_create(&ok).is_ok());

        let short = CreateApiKeyRequest {
            name: "ab".to_string(),
            expires_in_days: None,
        };
        assert!(validate_create(&short).is_err());

        let bad_ttl = CreateApiKeyRequest {
            name: "ci-deploy".to_string(),
            expires_in_days: Some(0),
        };
        let error = validate_create(&bad_ttl).unwrap_err();
        assert_eq!(error.code, "VALIDATION_ERROR");
        assert_eq!(error.details["errors"][0]["field"], "expires_in_days");

        let long_ttl = CreateApiKeyRequest {
            name: "ci-deploy".to_string(),
            expires_in_days: Some(366),
        };
        assert!(validate_create(&long_ttl).is_err());
    }
}
