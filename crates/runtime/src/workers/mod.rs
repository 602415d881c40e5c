//! Pipeline stage workers
//!
//! One worker process runs all three stage loops in priority order: parse,
//! then embed, then analyze. Coordination happens entirely through the jobs
//! table (status, retry_count, next_retry_at); replicas need no other lock.

use std::sync::Arc;
use std::time::Duration;

use qdrant_client::config::QdrantConfig as QdrantClientConfig;
use qdrant_client::Qdrant;
use sqlx::PgPool;

use crate::config::Config;
use crate::db;
use crate::github::GithubClient;
use crate::llm::SummaryOrchestrator;
use crate::observability;
use crate::types::RuntimeError;

pub mod analyze;
pub mod embed;
pub mod parse;
pub mod reliability;

const HEARTBEAT_KEY: &str = "devlens:worker:heartbeat";
const HEARTBEAT_TTL_SECONDS: u64 = 30;
const IDLE_SLEEP: Duration = Duration::from_secs(2);
const BUSY_SLEEP: Duration = Duration::from_secs(1);

/// Shared handles for all stage workers.
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub qdrant: Arc<Qdrant>,
    pub github: Arc<GithubClient>,
    pub summarizer: Arc<SummaryOrchestrator>,
    pub redis: redis::Client,
}

impl WorkerContext {
    pub async fn from_config(config: Config) -> Result<Self, RuntimeError> {
        let pool = db::connect(&config).await?;
        let qdrant = Qdrant::new(QdrantClientConfig::from_url(&config.database.qdrant_url))
            .map_err(|e| RuntimeError::VectorStore(e.to_string()))?;
        let redis = redis::Client::open(config.database.redis_url.as_str())?;
        let github = GithubClient::new(config.github.clone());
        let summarizer = SummaryOrchestrator::from_config(&config.llm);

        Ok(Self {
            config: Arc::new(config),
            pool,
            qdrant: Arc::new(qdrant),
            github: Arc::new(github),
            summarizer: Arc::new(summarizer),
            redis,
        })
    }
}

/// Run the worker loop until the process is terminated.
pub async fn run(config: Config) -> Result<(), RuntimeError> {
    let metrics_port = config.worker.metrics_port;
    let context = WorkerContext::from_config(config).await?;

    tokio::spawn(serve_metrics(metrics_port));
    tracing::info!(env = %context.config.env, "pipeline worker started");

    loop {
        heartbeat(&context.redis).await;

        let processed = match process_one(&context).await {
            Ok(processed) => processed,
            Err(error) => {
                tracing::error!(%error, "worker poll iteration failed");
                false
            }
        };

        tokio::time::sleep(if processed { BUSY_SLEEP } else { IDLE_SLEEP }).await;
    }
}

/// Process at most one job, trying the stages in pipeline order.
async fn process_one(context: &WorkerContext) -> Result<bool, sqlx::Error> {
    if parse::process_next(context).await? {
        return Ok(true);
    }
    if embed::process_next(context).await? {
        return Ok(true);
    }
    analyze::process_next(context).await
}

/// Liveness heartbeat; a missing key means no worker has polled recently.
async fn heartbeat(client: &redis::Client) {
    let now = chrono::Utc::now().timestamp();
    match client.get_multiplexed_async_connection().await {
        Ok(mut connection) => {
            let result: Result<(), redis::RedisError> = redis::cmd("SET")
                .arg(HEARTBEAT_KEY)
                .arg(now)
                .arg("EX")
                .arg(HEARTBEAT_TTL_SECONDS)
                .query_async(&mut connection)
                .await;
            if let Err(error) = result {
                tracing::warn!(%error, "worker heartbeat write failed");
            }
        }
        Err(error) => {
            tracing::warn!(%error, "worker heartbeat connection failed");
        }
    }
}

/// Minimal Prometheus listener for the worker process.
async fn serve_metrics(port: u16) {
    use axum::routing::get;

    let app = axum::Router::new().route(
        "/metrics",
        get(|| async {
            (
                [("content-type", "text/plain; version=0.0.4")],
                observability::render_metrics(),
            )
        }),
    );

    let addr = format!("0.0.0.0:{port}");
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            tracing::info!(%addr, "worker metrics listener started");
            if let Err(error) = axum::serve(listener, app).await {
                tracing::warn!(%error, "worker metrics listener stopped");
            }
        }
        Err(error) => {
            tracing::warn!(%addr, %error, "worker metrics bind failed");
        }
    }
}
