//! HTTP middleware: observability and rate limiting

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use super::errors::ApiError;
use super::AppState;
use crate::auth::tokens;
use crate::observability;
use crate::ratelimit::{self, IdentityClass, RateLimitDecision, RateLimitOutcome};

/// Per-request trace id, span, and duration histogram.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    // Label with the matched route template to keep cardinality bounded.
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let trace_id = observability::resolve_trace_id(
        request
            .headers()
            .get("x-trace-id")
            .and_then(|v| v.to_str().ok()),
    );

    let span = tracing::info_span!("http.request", %method, %path, %trace_id);
    let mut response = next.run(request).instrument(span).await;

    observability::http_request_duration()
        .with_label_values(&[
            method.as_str(),
            &path,
            response.status().as_str(),
        ])
        .observe(started.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("x-trace-id", value);
    }
    response
}

/// Which limiter scope, if any, gates this request.
pub fn limited_scope(method: &Method, path: &str) -> Option<&'static str> {
    if method != Method::POST {
        return None;
    }
    if path == "/api/v1/repos/analyze" {
        return Some("analyze");
    }
    if path.starts_with("/api/v1/chat") {
        return Some("chat");
    }
    None
}

/// Identity resolution: valid bearer subject, else forwarded/peer address.
fn classify_identity(state: &AppState, request: &Request) -> (IdentityClass, String) {
    if let Some(value) = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
    {
        if let Some((scheme, token)) = value.split_once(' ') {
            if scheme.eq_ignore_ascii_case("bearer") {
                if let Ok(claims) = tokens::decode_access_token(&state.config.auth, token.trim()) {
                    if !claims.sub.is_empty() {
                        return (IdentityClass::Auth, claims.sub);
                    }
                }
            }
        }
    }

    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return (IdentityClass::Guest, first.to_string());
            }
        }
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    (IdentityClass::Guest, peer)
}

fn apply_rate_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_epoch.to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
}

/// Fixed-window limiter over the analyze and chat mutation routes.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(scope) = limited_scope(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };

    let (class, identity) = classify_identity(&state, &request);
    let limit = match class {
        IdentityClass::Auth => state.config.rate_limit.auth_per_window,
        IdentityClass::Guest => state.config.rate_limit.guest_per_window,
    };
    let key = ratelimit::bucket_key(scope, class, &identity);

    match ratelimit::check(
        &state.redis,
        &key,
        limit,
        state.config.rate_limit.window_seconds,
    )
    .await
    {
        RateLimitOutcome::Unavailable => next.run(request).await,
        RateLimitOutcome::Decided(decision) if !decision.allowed => {
            let mut response = ApiError::rate_limited(serde_json::json!({
                "scope": scope,
                "identity_type": class.as_str(),
            }))
            .into_response();
            apply_rate_headers(&mut response, &decision);
            if let Ok(value) = HeaderValue::from_str(&decision.retry_after.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
            response
        }
        RateLimitOutcome::Decided(decision) => {
            let mut response = next.run(request).await;
            apply_rate_headers(&mut response, &decision);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_analyze_and_chat_posts_are_gated() {
        assert_eq!(
            limited_scope(&Method::POST, "/api/v1/repos/analyze"),
            Some("analyze")
        );
        assert_eq!(
            limited_scope(&Method::POST, "/api/v1/chat/sessions"),
            Some("chat")
        );
        assert_eq!(
            limited_scope(&Method::POST, "/api/v1/chat/sessions/abc/message"),
            Some("chat")
        );
        assert_eq!(limited_scope(&Method::GET, "/api/v1/repos/analyze"), None);
        assert_eq!(limited_scope(&Method::GET, "/api/v1/chat/sessions"), None);
        assert_eq!(limited_scope(&Method::POST, "/api/v1/repos/x/dashboard"), None);
    }
}
