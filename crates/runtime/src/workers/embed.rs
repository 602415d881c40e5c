//! Embedding stage: vectorize chunks and upsert into Qdrant
//!
//! Batches are upserted with `wait=true` so a subsequent hybrid search
//! observes the lexical and dense sides consistently; point ids are written
//! back to the chunk rows after each successful batch.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use qdrant_client::qdrant::{
    CreateCollection, Distance, PointStruct, UpsertPoints, Value as QdrantValue, VectorParams,
    VectorsConfig,
};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use super::{reliability, WorkerContext};
use crate::db::chunks;
use crate::db::jobs::{self, EmbedCandidate};
use crate::db::models::CodeChunkRecord;
use crate::observability;
use crate::retrieval::embedding;
use crate::types::{JobStatus, Stage, StageError};

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("No chunks available for embedding")]
    NoChunks,

    #[error("Qdrant request failed: {0}")]
    UpsertFailed(String),

    #[error("Chunks and vectors length mismatch")]
    VectorMismatch,
}

impl EmbedError {
    pub fn code(&self) -> &'static str {
        match self {
            EmbedError::NoChunks => "NO_CHUNKS",
            EmbedError::UpsertFailed(_) => "EMBED_UPSERT_FAILED",
            EmbedError::VectorMismatch => "EMBED_VECTOR_MISMATCH",
        }
    }
}

impl From<EmbedError> for StageError {
    fn from(error: EmbedError) -> Self {
        StageError::new(Stage::Embedding, error.code(), error.to_string())
    }
}

/// Run a Qdrant operation with bounded transport retries and linear backoff.
async fn with_retries<T, E, F, Fut>(attempts: u32, mut operation: F) -> Result<T, EmbedError>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                last_error = error.to_string();
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
            }
        }
    }

    Err(EmbedError::UpsertFailed(format!(
        "Qdrant request failed after retries: {last_error}"
    )))
}

/// Idempotent collection create; an already-existing collection is success.
async fn ensure_collection(context: &WorkerContext) -> Result<(), EmbedError> {
    let collection = &context.config.database.qdrant_collection;
    let vector_size = context.config.embed.vector_size;

    let collections = with_retries(context.config.embed.retry_attempts, || {
        context.qdrant.list_collections()
    })
    .await?;
    if collections
        .collections
        .iter()
        .any(|c| &c.name == collection)
    {
        return Ok(());
    }

    let create = CreateCollection {
        collection_name: collection.clone(),
        vectors_config: Some(VectorsConfig {
            config: Some(qdrant_client::qdrant::vectors_config::Config::Params(
                VectorParams {
                    size: vector_size as u64,
                    distance: Distance::Cosine as i32,
                    hnsw_config: None,
                    quantization_config: None,
                    on_disk: None,
                    datatype: None,
                    multivector_config: None,
                },
            )),
        }),
        hnsw_config: None,
        wal_config: None,
        optimizers_config: None,
        shard_number: None,
        on_disk_payload: None,
        timeout: Some(20),
        replication_factor: None,
        write_consistency_factor: None,
        init_from_collection: None,
        quantization_config: None,
        sharding_method: None,
        sparse_vectors_config: None,
        strict_mode_config: None,
    };

    match context.qdrant.create_collection(create).await {
        Ok(_) => Ok(()),
        // A concurrent worker may have created it between list and create.
        Err(error) if error.to_string().to_lowercase().contains("already exists") => Ok(()),
        Err(error) => Err(EmbedError::UpsertFailed(error.to_string())),
    }
}

fn chunk_payload(repo_id: Uuid, chunk: &CodeChunkRecord) -> HashMap<String, QdrantValue> {
    let mut payload = HashMap::new();
    payload.insert("repo_id".to_string(), QdrantValue::from(repo_id.to_string()));
    payload.insert(
        "chunk_id".to_string(),
        QdrantValue::from(chunk.id.to_string()),
    );
    payload.insert(
        "file_path".to_string(),
        QdrantValue::from(chunk.file_path.clone()),
    );
    if let Some(start_line) = chunk.start_line {
        payload.insert("start_line".to_string(), QdrantValue::from(start_line as i64));
    }
    if let Some(end_line) = chunk.end_line {
        payload.insert("end_line".to_string(), QdrantValue::from(end_line as i64));
    }
    if let Some(language) = &chunk.language {
        payload.insert("language".to_string(), QdrantValue::from(language.clone()));
    }
    payload
}

/// Upsert one batch of chunk vectors with `wait=true`, returning the fresh
/// point id assigned to each chunk.
async fn upsert_chunk_vectors(
    context: &WorkerContext,
    repo_id: Uuid,
    batch: &[CodeChunkRecord],
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Uuid>, EmbedError> {
    if batch.len() != vectors.len() {
        return Err(EmbedError::VectorMismatch);
    }

    let mut point_ids = Vec::with_capacity(batch.len());
    let mut points = Vec::with_capacity(batch.len());
    for (chunk, vector) in batch.iter().zip(vectors) {
        let point_id = Uuid::new_v4();
        point_ids.push(point_id);
        points.push(PointStruct::new(
            point_id.to_string(),
            vector,
            chunk_payload(repo_id, chunk),
        ));
    }

    with_retries(context.config.embed.retry_attempts, || {
        let upsert = UpsertPoints {
            collection_name: context.config.database.qdrant_collection.clone(),
            wait: Some(true),
            points: points.clone(),
            ordering: None,
            shard_key_selector: None,
        };
        context.qdrant.upsert_points(upsert)
    })
    .await?;

    Ok(point_ids)
}

/// Claim and process the next embed-eligible job, if any.
pub async fn process_next(context: &WorkerContext) -> Result<bool, sqlx::Error> {
    let Some(candidate) = jobs::next_embed_candidate(&context.pool).await? else {
        return Ok(false);
    };

    let claimed = jobs::claim(
        &context.pool,
        candidate.job_id,
        &[JobStatus::Embedding],
        JobStatus::Embedding,
        10,
    )
    .await?;
    if !claimed {
        return Ok(true);
    }

    run_embed_job(context, &candidate).await;
    Ok(true)
}

async fn run_embed_job(context: &WorkerContext, candidate: &EmbedCandidate) {
    let started = Instant::now();
    let span = tracing::info_span!(
        "worker.embed",
        job_id = %candidate.job_id,
        repo_id = %candidate.repo_id
    );

    match embed_job(context, candidate).instrument(span).await {
        Ok(()) => {
            observability::record_stage_duration("embedding", "success", started.elapsed().as_secs_f64());
        }
        Err(error) => {
            if let Err(db_error) = reliability::schedule_retry_or_dead_letter(
                &context.pool,
                &context.config.worker,
                candidate.job_id,
                candidate.repo_id,
                &error,
                serde_json::json!({}),
            )
            .await
            {
                tracing::error!(%db_error, "failed to persist retry/dead-letter state");
            }
            observability::record_stage_duration("embedding", "error", started.elapsed().as_secs_f64());
        }
    }
}

async fn embed_job(context: &WorkerContext, candidate: &EmbedCandidate) -> Result<(), StageError> {
    let vector_size = context.config.embed.vector_size;
    let batch_size = context.config.embed.batch_size.max(1);

    let all_chunks = chunks::load_for_repo(&context.pool, candidate.repo_id)
        .await
        .map_err(|e| StageError::unexpected(Stage::Embedding, e.to_string()))?;
    if all_chunks.is_empty() {
        return Err(EmbedError::NoChunks.into());
    }

    ensure_collection(context).await.map_err(StageError::from)?;
    jobs::update_status(&context.pool, candidate.job_id, JobStatus::Embedding, 40)
        .await
        .map_err(|e| StageError::unexpected(Stage::Embedding, e.to_string()))?;

    let total = all_chunks.len();
    let mut processed = 0usize;

    for batch in all_chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = embedding::embed_chunk_texts(&texts, vector_size);

        let point_ids = upsert_chunk_vectors(context, candidate.repo_id, batch, vectors)
            .await
            .map_err(StageError::from)?;

        let pairs: Vec<(Uuid, Uuid)> = batch
            .iter()
            .map(|c| c.id)
            .zip(point_ids.iter().copied())
            .collect();
        chunks::set_point_ids(&context.pool, &pairs)
            .await
            .map_err(|e| StageError::unexpected(Stage::Embedding, e.to_string()))?;

        processed += batch.len();
        let progress = (40 + ((processed as f64 / total as f64) * 50.0) as i32).min(95);
        jobs::update_status(&context.pool, candidate.job_id, JobStatus::Embedding, progress)
            .await
            .map_err(|e| StageError::unexpected(Stage::Embedding, e.to_string()))?;
    }

    tracing::info!(chunks = total, "embed stage complete");

    jobs::update_status(&context.pool, candidate.job_id, JobStatus::Analyzing, 100)
        .await
        .map_err(|e| StageError::unexpected(Stage::Embedding, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(path: &str, start: Option<i32>, end: Option<i32>) -> CodeChunkRecord {
        CodeChunkRecord {
            id: Uuid::new_v4(),
            repo_id: Uuid::new_v4(),
            file_path: path.to_string(),
            start_line: start,
            end_line: end,
            content: "fn main() {}".to_string(),
            language: Some("rs".to_string()),
            qdrant_point_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn payload_carries_the_exact_key_set() {
        let repo_id = Uuid::new_v4();
        let record = chunk("src/main.rs", Some(1), Some(40));
        let payload = chunk_payload(repo_id, &record);
        let mut keys: Vec<&str> = payload.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["chunk_id", "end_line", "file_path", "language", "repo_id", "start_line"]
        );
    }

    #[test]
    fn payload_omits_absent_lines() {
        let payload = chunk_payload(Uuid::new_v4(), &chunk("src/main.rs", None, None));
        assert!(!payload.contains_key("start_line"));
        assert!(!payload.contains_key("end_line"));
    }

    #[test]
    fn embed_error_codes_are_stable() {
        assert_eq!(EmbedError::NoChunks.code(), "NO_CHUNKS");
        assert_eq!(
            EmbedError::UpsertFailed("boom".to_string()).code(),
            "EMBED_UPSERT_FAILED"
        );
        assert_eq!(EmbedError::VectorMismatch.code(), "EMBED_VECTOR_MISMATCH");
    }

    #[tokio::test]
    async fn retries_exhaust_into_upsert_failed() {
        let result: Result<(), EmbedError> =
            with_retries(2, || async { Err("transient server error") }).await;
        match result {
            Err(EmbedError::UpsertFailed(message)) => {
                assert!(message.contains("after retries"));
                assert!(message.contains("transient server error"));
            }
            other => panic!("expected UpsertFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_return_the_first_success() {
        let mut calls = 0u32;
        let result = with_retries(3, || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 2 {
                    Err("flaky")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn batch_progress_stays_within_milestones() {
        // Mirrors the 40 -> 95 linear interpolation in embed_job.
        let total = 10usize;
        for processed in 1..=total {
            let progress = (40 + ((processed as f64 / total as f64) * 50.0) as i32).min(95);
            assert!((40..=95).contains(&progress));
        }
    }
}
