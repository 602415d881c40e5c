//! Request extractors
//!
//! The `Api*` wrappers exist so extractor rejections serialize as the error
//! envelope instead of axum's plain-text defaults: body deserialization
//! failures become `VALIDATION_ERROR`, malformed path/query parameters
//! become `BAD_REQUEST`/`VALIDATION_ERROR`.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde_json::json;
use uuid::Uuid;

use super::errors::ApiError;
use super::AppState;
use crate::auth::tokens;
use crate::db::models::UserRecord;
use crate::db::users;

pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::validation(vec![json!({
                "message": rejection.body_text(),
            })])),
        }
    }
}

pub struct ApiQuery<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::validation(vec![json!({
                "message": rejection.body_text(),
            })])),
        }
    }
}

pub struct ApiPath<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}

/// The authenticated user resolved from a bearer access token.
///
/// Rejections are 401s with the discriminating messages the auth tests
/// assert on; ownership failures elsewhere stay 404s.
pub struct CurrentUser(pub UserRecord);

/// Pull the bearer token out of request parts, if any.
pub fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return None;
    }
    Some(token.trim().to_string())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let claims = tokens::decode_access_token(&state.config.auth, &token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ApiError::unauthorized("Invalid token subject"))?;

        let user = users::find_by_id(&state.pool, user_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("User not found"))?;

        Ok(CurrentUser(user))
    }
}
