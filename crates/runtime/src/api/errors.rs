//! API error envelope
//!
//! Every failure serializes as `{"error": {"code", "message", "details"}}`.
//! Unmapped internal errors collapse to a bare 500 with no detail leakage.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::auth::AuthError;
use crate::github::GithubError;
use crate::retrieval::RetrievalError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Value,
}

/// The canonical status -> code table.
pub fn code_for_status(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "BAD_REQUEST",
        401 => "UNAUTHORIZED",
        403 => "FORBIDDEN",
        404 => "NOT_FOUND",
        409 => "CONFLICT",
        422 => "VALIDATION_ERROR",
        429 => "RATE_LIMITED",
        500 => "INTERNAL_ERROR",
        502 => "UPSTREAM_ERROR",
        503 => "SERVICE_UNAVAILABLE",
        _ => "HTTP_ERROR",
    }
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code_for_status(status).to_string(),
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// 422 with the per-field error list under `details.errors`.
    pub fn validation(errors: Vec<Value>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "Request validation failed")
            .with_details(json!({ "errors": errors }))
    }

    pub fn rate_limited(details: Value) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").with_details(details)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected server error")
    }

    pub fn body(&self) -> Value {
        json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        tracing::error!(%error, "database error in request handler");
        Self::internal()
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match &error {
            AuthError::InvalidState
            | AuthError::InvalidStateSignature
            | AuthError::InvalidStatePayload
            | AuthError::StateExpired
            | AuthError::InvalidShareTtl(_) => Self::bad_request(error.to_string()),
            AuthError::InvalidAccessToken
            | AuthError::InvalidShareToken
            | AuthError::ShareTokenExpired
            | AuthError::InvalidShareTokenPayload => Self::unauthorized(error.to_string()),
            AuthError::Encoding(message) => {
                tracing::error!(%message, "token encoding failed");
                Self::internal()
            }
        }
    }
}

impl From<GithubError> for ApiError {
    fn from(error: GithubError) -> Self {
        match &error {
            GithubError::InvalidUrl(_) => Self::bad_request(error.to_string()),
            GithubError::RepoNotFound => Self::not_found("Repository not found"),
            GithubError::Upstream(_) => Self::upstream(error.to_string()),
        }
    }
}

impl From<RetrievalError> for ApiError {
    fn from(error: RetrievalError) -> Self {
        match &error {
            RetrievalError::EmptyQuery | RetrievalError::MissingRepoFilter => {
                Self::bad_request(error.to_string())
            }
            RetrievalError::Database(db_error) => {
                tracing::error!(error = %db_error, "database error in retrieval");
                Self::internal()
            }
            RetrievalError::VectorStore(message) => {
                tracing::warn!(%message, "vector store error in retrieval");
                Self::upstream("Qdrant search failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_canonical_codes() {
        assert_eq!(code_for_status(StatusCode::BAD_REQUEST), "BAD_REQUEST");
        assert_eq!(code_for_status(StatusCode::UNAUTHORIZED), "UNAUTHORIZED");
        assert_eq!(code_for_status(StatusCode::FORBIDDEN), "FORBIDDEN");
        assert_eq!(code_for_status(StatusCode::NOT_FOUND), "NOT_FOUND");
        assert_eq!(code_for_status(StatusCode::CONFLICT), "CONFLICT");
        assert_eq!(
            code_for_status(StatusCode::UNPROCESSABLE_ENTITY),
            "VALIDATION_ERROR"
        );
        assert_eq!(code_for_status(StatusCode::TOO_MANY_REQUESTS), "RATE_LIMITED");
        assert_eq!(
            code_for_status(StatusCode::INTERNAL_SERVER_ERROR),
            "INTERNAL_ERROR"
        );
        assert_eq!(code_for_status(StatusCode::BAD_GATEWAY), "UPSTREAM_ERROR");
        assert_eq!(
            code_for_status(StatusCode::SERVICE_UNAVAILABLE),
            "SERVICE_UNAVAILABLE"
        );
    }

    #[test]
    fn envelope_has_the_documented_shape() {
        let body = ApiError::bad_request("Query must not be empty").body();
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
        assert_eq!(body["error"]["message"], "Query must not be empty");
        assert!(body["error"]["details"].is_object());
    }

    #[test]
    fn validation_errors_carry_details() {
        let body = ApiError::validation(vec![json!({"field": "name", "message": "too short"})]).body();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"]["errors"][0]["field"], "name");
    }

    #[test]
    fn internal_errors_do_not_leak() {
        let error: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "Unexpected server error");
    }

    #[test]
    fn share_token_errors_collapse_to_unauthorized() {
        let error: ApiError = AuthError::ShareTokenExpired.into();
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(error.message, "Share token expired");
    }
}
