//! OAuth round-trip, refresh rotation, and session identity

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Redirect;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use subtle::ConstantTimeEq;
use url::Url;

use crate::api::errors::{ApiError, ApiResult};
use crate::api::extract::{ApiQuery, CurrentUser};
use crate::api::types::{AuthGithubQuery, CallbackQuery, CurrentUserResponse, RefreshAccessTokenResponse};
use crate::api::AppState;
use crate::auth::tokens::{
    self, CSRF_COOKIE_NAME, CSRF_HEADER_NAME, REFRESH_COOKIE_NAME,
};
use crate::auth::oauth_state;
use crate::config::Config;
use crate::db::{refresh_tokens, users};

fn build_refresh_cookie(config: &Config, value: String) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE_NAME, value))
        .http_only(true)
        .secure(config.secure_cookies())
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(config.auth.jwt_refresh_ttl_days))
        .path("/")
        .build()
}

fn build_csrf_cookie(config: &Config, value: String) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE_NAME, value))
        .http_only(false)
        .secure(config.secure_cookies())
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(config.auth.jwt_refresh_ttl_days))
        .path("/")
        .build()
}

fn expected_origin(frontend_url: &str) -> Option<String> {
    let parsed = Url::parse(frontend_url).ok()?;
    Some(parsed.origin().ascii_serialization().to_lowercase())
}

/// Enforce the Origin header (with Referer fallback) against the frontend.
fn validate_origin(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = expected_origin(&config.frontend_url)
        .ok_or_else(ApiError::internal)?;

    if let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) {
        if origin.to_lowercase() == expected {
            return Ok(());
        }
        return Err(ApiError::forbidden("Invalid request origin"));
    }

    if let Some(referer) = headers.get("referer").and_then(|v| v.to_str().ok()) {
        let candidate = Url::parse(referer)
            .ok()
            .map(|u| u.origin().ascii_serialization().to_lowercase());
        if candidate.as_deref() == Some(expected.as_str()) {
            return Ok(());
        }
        return Err(ApiError::forbidden("Invalid request origin"));
    }

    Err(ApiError::forbidden("Missing request origin"))
}

/// Double-submit check: CSRF cookie must equal the header copy.
fn validate_csrf(headers: &HeaderMap, jar: &CookieJar) -> Result<(), ApiError> {
    let cookie = jar.get(CSRF_COOKIE_NAME).map(|c| c.value().to_string());
    let header = headers
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match (cookie, header) {
        (Some(cookie), Some(header))
            if bool::from(cookie.as_bytes().ct_eq(header.as_bytes())) =>
        {
            Ok(())
        }
        _ => Err(ApiError::forbidden("CSRF validation failed")),
    }
}

/// Start the GitHub OAuth flow.
#[utoipa::path(
    get,
    path = "/api/v1/auth/github",
    params(AuthGithubQuery),
    responses((status = 302, description = "Redirect to the provider authorization page")),
    tag = "auth"
)]
pub async fn auth_github(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<AuthGithubQuery>,
) -> Redirect {
    let oauth_state = oauth_state::generate(&state.config.auth.jwt_secret, query.next.as_deref());
    Redirect::to(&state.github.authorize_url(&oauth_state))
}

/// Handle the provider callback: upsert the user, set cookies, redirect.
#[utoipa::path(
    get,
    path = "/api/v1/auth/callback",
    params(CallbackQuery),
    responses(
        (status = 302, description = "Login succeeded, redirected to the frontend"),
        (status = 400, description = "Invalid OAuth state", body = crate::api::types::ErrorEnvelope),
        (status = 502, description = "Provider exchange failed", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn auth_callback(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CallbackQuery>,
) -> ApiResult<(CookieJar, Redirect)> {
    let state_data = oauth_state::validate(&state.config.auth.jwt_secret, &query.state)?;

    let provider_token = state.github.exchange_code(&query.code).await?;
    let profile = state.github.fetch_user(&provider_token).await?;
    if profile.login.is_empty() {
        return Err(ApiError::upstream("Invalid GitHub profile payload"));
    }

    let user = users::upsert_github_user(
        &state.pool,
        profile.id,
        &profile.login,
        profile.email.as_deref(),
        profile.avatar_url.as_deref(),
    )
    .await?;

    let refresh_token = tokens::issue_refresh_token();
    refresh_tokens::insert(
        &state.pool,
        user.id,
        &tokens::hash_refresh_token(&refresh_token),
        tokens::refresh_expiry(&state.config.auth),
    )
    .await?;

    // Only frontend-relative paths are honored on redirect.
    let next = if state_data.next.starts_with('/') {
        state_data.next
    } else {
        "/profile".to_string()
    };
    let redirect_url = format!("{}{}", state.config.frontend_url.trim_end_matches('/'), next);

    let jar = CookieJar::new()
        .add(build_refresh_cookie(&state.config, refresh_token))
        .add(build_csrf_cookie(&state.config, tokens::issue_csrf_token()));

    Ok((jar, Redirect::to(&redirect_url)))
}

/// Rotate the refresh cookie and issue a new access token.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    responses(
        (status = 200, description = "New access token", body = RefreshAccessTokenResponse),
        (status = 401, description = "Missing, invalid, revoked, or expired refresh token", body = crate::api::types::ErrorEnvelope),
        (status = 403, description = "Origin or CSRF validation failed", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Json<RefreshAccessTokenResponse>)> {
    validate_origin(&state.config, &headers)?;
    validate_csrf(&headers, &jar)?;

    let presented = jar
        .get(REFRESH_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .ok_or_else(|| ApiError::unauthorized("Missing refresh token"))?;

    let token_hash = tokens::hash_refresh_token(&presented);
    let row = refresh_tokens::find_by_hash(&state.pool, &token_hash)
        .await?
        .filter(|row| row.revoked_at.is_none())
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    if row.expires_at <= chrono::Utc::now() {
        return Err(ApiError::unauthorized("Refresh token expired"));
    }

    let user = users::find_by_id(&state.pool, row.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    // Rotation: the presented secret never authenticates again.
    refresh_tokens::revoke(&state.pool, row.id).await?;
    let rotated = tokens::issue_refresh_token();
    refresh_tokens::insert(
        &state.pool,
        user.id,
        &tokens::hash_refresh_token(&rotated),
        tokens::refresh_expiry(&state.config.auth),
    )
    .await?;

    let access_token = tokens::create_access_token(&state.config.auth, user.id)?;
    let jar = jar
        .add(build_refresh_cookie(&state.config, rotated))
        .add(build_csrf_cookie(&state.config, tokens::issue_csrf_token()));

    Ok((
        jar,
        Json(RefreshAccessTokenResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in_seconds: state.config.auth.jwt_access_ttl_minutes * 60,
        }),
    ))
}

/// Revoke the current refresh token and clear both cookies.
#[utoipa::path(
    delete,
    path = "/api/v1/auth/logout",
    responses(
        (status = 204, description = "Logged out"),
        (status = 403, description = "Origin or CSRF validation failed", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<(CookieJar, StatusCode)> {
    validate_origin(&state.config, &headers)?;
    validate_csrf(&headers, &jar)?;

    if let Some(presented) = jar.get(REFRESH_COOKIE_NAME).map(|c| c.value().to_string()) {
        let token_hash = tokens::hash_refresh_token(&presented);
        if let Some(row) = refresh_tokens::find_by_hash(&state.pool, &token_hash).await? {
            if row.revoked_at.is_none() {
                refresh_tokens::revoke(&state.pool, row.id).await?;
            }
        }
    }

    let jar = jar
        .remove(Cookie::build(REFRESH_COOKIE_NAME).path("/").build())
        .remove(Cookie::build(CSRF_COOKIE_NAME).path("/").build());

    Ok((jar, StatusCode::NO_CONTENT))
}

/// Fetch the authenticated user.
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = CurrentUserResponse),
        (status = 401, description = "Missing or invalid bearer token", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "auth"
)]
pub async fn me(CurrentUser(user): CurrentUser) -> Json<CurrentUserResponse> {
    Json(CurrentUserResponse {
        id: user.id.to_string(),
        github_id: user.github_id,
        username: user.username,
        email: user.email,
        avatar_url: user.avatar_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_origin_strips_path_and_lowercases() {
        assert_eq!(
            expected_origin("https://App.DevLens.dev/some/path").unwrap(),
            "https://app.devlens.dev"
        );
        assert_eq!(
            expected_origin("http://localhost:3000").unwrap(),
            "http://localhost:3000"
        );
    }

    #[test]
    fn origin_header_must_match_frontend() {
        let config = test_config();
        let mut headers = HeaderMap::new();
        headers.insert("origin", "http://localhost:3000".parse().unwrap());
        assert!(validate_origin(&config, &headers).is_ok());

        headers.insert("origin", "https://evil.example".parse().unwrap());
        assert!(validate_origin(&config, &headers).is_err());
    }

    #[test]
    fn referer_is_a_fallback_only() {
        let config = test_config();
        let mut headers = HeaderMap::new();
        headers.insert("referer", "http://localhost:3000/profile".parse().unwrap());
        assert!(validate_origin(&config, &headers).is_ok());

        // An explicit Origin wins over a matching Referer.
        headers.insert("origin", "https://evil.example".parse().unwrap());
        assert!(validate_origin(&config, &headers).is_err());
    }

    #[test]
    fn missing_origin_and_referer_is_rejected() {
        let config = test_config();
        let error = validate_origin(&config, &HeaderMap::new()).unwrap_err();
        assert_eq!(error.message, "Missing request origin");
    }

    #[test]
    fn csrf_requires_matching_cookie_and_header() {
        let jar = CookieJar::new().add(Cookie::new(CSRF_COOKIE_NAME, "token-value"));

        let mut headers = HeaderMap::new();
        headers.insert(CSRF_HEADER_NAME, "token-value".parse().unwrap());
        assert!(validate_csrf(&headers, &jar).is_ok());

        headers.insert(CSRF_HEADER_NAME, "different".parse().unwrap());
        assert!(validate_csrf(&headers, &jar).is_err());

        assert!(validate_csrf(&HeaderMap::new(), &jar).is_err());
        assert!(validate_csrf(&headers, &CookieJar::new()).is_err());
    }

    fn test_config() -> Config {
        Config::for_tests()
    }
}
