//! HTTP API server
//!
//! Axum routers over the shared [`AppState`]. Control flow per request:
//! middleware (observability, rate limit) → handler → gateway commit.

use std::sync::Arc;

use qdrant_client::config::QdrantConfig as QdrantClientConfig;
use qdrant_client::Qdrant;
use sqlx::PgPool;

use crate::config::Config;
use crate::db;
use crate::github::GithubClient;
use crate::types::RuntimeError;

pub mod errors;
pub mod extract;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod sse;
pub mod types;

pub use server::{build_router, serve};

/// Shared state handle cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub redis: redis::Client,
    pub qdrant: Arc<Qdrant>,
    pub github: Arc<GithubClient>,
}

impl AppState {
    pub async fn from_config(config: Config) -> Result<Self, RuntimeError> {
        let pool = db::connect(&config).await?;
        let redis = redis::Client::open(config.database.redis_url.as_str())?;
        let qdrant = Qdrant::new(QdrantClientConfig::from_url(&config.database.qdrant_url))
            .map_err(|e| RuntimeError::VectorStore(e.to_string()))?;
        let github = GithubClient::new(config.github.clone());

        Ok(Self {
            config: Arc::new(config),
            pool,
            redis,
            qdrant: Arc::new(qdrant),
            github: Arc::new(github),
        })
    }
}
