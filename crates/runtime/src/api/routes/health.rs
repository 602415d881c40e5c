//! Liveness, dependency health, and metrics exposition

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use url::Url;

use crate::api::types::{DepsHealthResponse, HealthResponse};
use crate::api::AppState;
use crate::observability;

async fn tcp_check(raw_url: &str, default_port: u16) -> bool {
    let Ok(parsed) = Url::parse(raw_url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let port = parsed.port().unwrap_or(default_port);

    tokio::time::timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect((host, port)),
    )
    .await
    .map(|result| result.is_ok())
    .unwrap_or(false)
}

async fn qdrant_check(base_url: &str) -> bool {
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let client = reqwest::Client::new();
    matches!(
        client
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await,
        Ok(response) if response.status() == 200
    )
}

/// Service liveness.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "system"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "backend".to_string(),
        env: state.config.env.clone(),
    })
}

/// Reachability of the storage backends.
#[utoipa::path(
    get,
    path = "/health/deps",
    responses((status = 200, description = "Dependency probe results", body = DepsHealthResponse)),
    tag = "system"
)]
pub async fn health_deps(State(state): State<AppState>) -> Json<DepsHealthResponse> {
    let redis = tcp_check(&state.config.database.redis_url, 6379).await;
    let postgres = tcp_check(&state.config.database.url, 5432).await;
    let qdrant = qdrant_check(&state.config.database.qdrant_url).await;

    Json(DepsHealthResponse {
        redis,
        postgres,
        qdrant,
        all_healthy: redis && postgres && qdrant,
    })
}

/// Prometheus text exposition.
pub async fn metrics() -> ([(&'static str, &'static str); 1], String) {
    (
        [("content-type", "text/plain; version=0.0.4")],
        observability::render_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp_check_fails_fast_on_bad_urls() {
        assert!(!tcp_check("not a url", 5432).await);
        assert!(!tcp_check("postgres://", 5432).await);
    }
}
