//! Repository analysis, search, dashboard, and status streaming

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::api::errors::{ApiError, ApiResult};
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::sse;
use crate::api::types::{
    AnalyzeRepoRequest, AnalyzeRepoResponse, DashboardRepository, DashboardResponse,
    HybridSearchChunk, HybridSearchResponse, LexicalSearchChunk, LexicalSearchResponse,
    SearchQuery, StatusQuery,
};
use crate::api::AppState;
use crate::db::models::RepositoryRecord;
use crate::db::{chunks, jobs, repositories, results};
use crate::graph::{build_dependency_graph, DependencyGraph};
use crate::retrieval::{hybrid, lexical};
use crate::types::JobStatus;

const DEFAULT_SEARCH_LIMIT: usize = 20;

async fn repo_or_404(state: &AppState, repo_id: Uuid) -> Result<RepositoryRecord, ApiError> {
    repositories::find_by_id(&state.pool, repo_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Repository not found"))
}

/// Create or reuse an analysis job for a repository head.
///
/// Dedup order: `force_reanalyze` skips dedup entirely; an idempotency key
/// matches any prior job for (repo, commit, key); otherwise the latest
/// active-or-done job for (repo, commit) is reused. Failed jobs never block
/// a fresh run.
#[utoipa::path(
    post,
    path = "/api/v1/repos/analyze",
    request_body = AnalyzeRepoRequest,
    responses(
        (status = 200, description = "Job created or existing job returned", body = AnalyzeRepoResponse),
        (status = 400, description = "Invalid GitHub URL", body = crate::api::types::ErrorEnvelope),
        (status = 429, description = "Rate limit exceeded", body = crate::api::types::ErrorEnvelope),
        (status = 502, description = "Provider failure", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "repos"
)]
pub async fn analyze_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<AnalyzeRepoRequest>,
) -> ApiResult<Json<AnalyzeRepoResponse>> {
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let snapshot = state.github.resolve_snapshot(&request.github_url).await?;
    let repo = repositories::upsert_snapshot(&state.pool, &snapshot).await?;
    let commit_sha = snapshot.commit_sha.as_str();

    if !request.force_reanalyze {
        if let Some(key) = idempotency_key {
            if let Some(job) =
                jobs::find_by_idempotency_key(&state.pool, repo.id, commit_sha, key).await?
            {
                return Ok(Json(AnalyzeRepoResponse {
                    job_id: job.id.to_string(),
                    repo_id: repo.id.to_string(),
                    cache_hit: job.status == JobStatus::Done.as_str(),
                    status: job.status,
                    commit_sha: commit_sha.to_string(),
                }));
            }
        }

        if let Some(job) = jobs::find_active_or_done(&state.pool, repo.id, commit_sha).await? {
            return Ok(Json(AnalyzeRepoResponse {
                job_id: job.id.to_string(),
                repo_id: repo.id.to_string(),
                cache_hit: job.status == JobStatus::Done.as_str(),
                status: job.status,
                commit_sha: commit_sha.to_string(),
            }));
        }
    }

    let job = jobs::create(&state.pool, repo.id, None, idempotency_key, commit_sha).await?;
    Ok(Json(AnalyzeRepoResponse {
        job_id: job.id.to_string(),
        repo_id: repo.id.to_string(),
        status: job.status,
        cache_hit: false,
        commit_sha: commit_sha.to_string(),
    }))
}

/// Stream analysis progress as SSE until terminal or disconnect.
#[utoipa::path(
    get,
    path = "/api/v1/repos/{repo_id}/status",
    params(("repo_id" = Uuid, Path, description = "Repository id"), StatusQuery),
    responses(
        (status = 200, description = "text/event-stream of progress/done/error events"),
        (status = 404, description = "Repository not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "repos"
)]
pub async fn stream_status(
    State(state): State<AppState>,
    ApiPath(repo_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<StatusQuery>,
) -> ApiResult<Response> {
    repo_or_404(&state, repo_id).await?;
    let once = query.once.unwrap_or(false);
    Ok(sse::job_status_stream(state, repo_id, once).into_response())
}

/// Repository metadata plus the latest analysis result.
#[utoipa::path(
    get,
    path = "/api/v1/repos/{repo_id}/dashboard",
    params(("repo_id" = Uuid, Path, description = "Repository id")),
    responses(
        (status = 200, description = "Dashboard payload", body = DashboardResponse),
        (status = 404, description = "Repository not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "repos"
)]
pub async fn dashboard(
    State(state): State<AppState>,
    ApiPath(repo_id): ApiPath<Uuid>,
) -> ApiResult<Json<DashboardResponse>> {
    let repo = repo_or_404(&state, repo_id).await?;
    let result = results::latest_for_repo(&state.pool, repo.id).await?;

    let analysis = result.as_ref().map(|result| {
        serde_json::json!({
            "quality_score": result.quality_score,
            "architecture_summary": result.architecture_summary,
            "language_breakdown": result.language_breakdown,
            "contributor_stats": result.contributor_stats,
            "tech_debt_flags": result.tech_debt_flags,
            "file_tree": result.file_tree,
            "created_at": result.created_at,
        })
    });

    Ok(Json(DashboardResponse {
        repo_id: repo.id.to_string(),
        repository: DashboardRepository {
            id: repo.id.to_string(),
            github_url: repo.github_url,
            full_name: repo.full_name,
            owner: repo.owner,
            name: repo.name,
            default_branch: repo.default_branch,
            latest_commit_sha: repo.latest_commit_sha,
            description: repo.description,
            stars: repo.stars,
            forks: repo.forks,
            language: repo.language,
            size_kb: repo.size_kb,
        },
        has_analysis: analysis.is_some(),
        analysis,
    }))
}

/// Keyword search ranked by `ts_rank_cd`, scoped to the repository.
#[utoipa::path(
    get,
    path = "/api/v1/repos/{repo_id}/search/lexical",
    params(("repo_id" = Uuid, Path, description = "Repository id"), SearchQuery),
    responses(
        (status = 200, description = "Ranked matches", body = LexicalSearchResponse),
        (status = 400, description = "Empty query", body = crate::api::types::ErrorEnvelope),
        (status = 404, description = "Repository not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "repos"
)]
pub async fn search_lexical(
    State(state): State<AppState>,
    ApiPath(repo_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Json<LexicalSearchResponse>> {
    repo_or_404(&state, repo_id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let hits = lexical::search(&state.pool, repo_id, &query.q, limit).await?;

    Ok(Json(LexicalSearchResponse {
        repo_id: repo_id.to_string(),
        query: query.q,
        total: hits.len(),
        results: hits
            .into_iter()
            .map(|hit| LexicalSearchChunk {
                chunk_id: hit.chunk_id.to_string(),
                file_path: hit.file_path,
                start_line: hit.start_line,
                end_line: hit.end_line,
                language: hit.language,
                score: hit.score,
            })
            .collect(),
    }))
}

/// Dense + lexical retrieval merged by the deterministic reranker.
#[utoipa::path(
    get,
    path = "/api/v1/repos/{repo_id}/search/hybrid",
    params(("repo_id" = Uuid, Path, description = "Repository id"), SearchQuery),
    responses(
        (status = 200, description = "Reranked matches", body = HybridSearchResponse),
        (status = 400, description = "Empty query", body = crate::api::types::ErrorEnvelope),
        (status = 404, description = "Repository not found", body = crate::api::types::ErrorEnvelope),
        (status = 502, description = "Vector store failure", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "repos"
)]
pub async fn search_hybrid(
    State(state): State<AppState>,
    ApiPath(repo_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Json<HybridSearchResponse>> {
    repo_or_404(&state, repo_id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let hits = hybrid::search(
        &state.pool,
        &state.qdrant,
        &state.config.database.qdrant_collection,
        state.config.embed.vector_size,
        repo_id,
        &query.q,
        limit,
    )
    .await?;

    Ok(Json(HybridSearchResponse {
        repo_id: repo_id.to_string(),
        query: query.q,
        total: hits.len(),
        results: hits
            .into_iter()
            .map(|hit| HybridSearchChunk {
                chunk_id: hit.chunk_id.to_string(),
                file_path: hit.file_path,
                start_line: hit.start_line,
                end_line: hit.end_line,
                language: hit.language,
                dense_score: hit.dense_score,
                lexical_score: hit.lexical_score,
                rerank_score: hit.rerank_score,
            })
            .collect(),
    }))
}

/// Import graph over the indexed chunks.
#[utoipa::path(
    get,
    path = "/api/v1/repos/{repo_id}/graph",
    params(("repo_id" = Uuid, Path, description = "Repository id")),
    responses(
        (status = 200, description = "Dependency graph"),
        (status = 404, description = "Repository not found", body = crate::api::types::ErrorEnvelope)
    ),
    tag = "repos"
)]
pub async fn dependency_graph(
    State(state): State<AppState>,
    ApiPath(repo_id): ApiPath<Uuid>,
) -> ApiResult<Json<DependencyGraph>> {
    repo_or_404(&state, repo_id).await?;

    let rows = chunks::load_for_repo(&state.pool, repo_id).await?;
    let file_chunks: Vec<(String, String)> = rows
        .into_iter()
        .map(|row| (row.file_path, row.content))
        .collect();

    Ok(Json(build_dependency_graph(&file_chunks)))
}
