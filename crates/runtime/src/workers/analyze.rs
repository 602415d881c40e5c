//! Analysis stage: derive the report from the indexed chunks
//!
//! Computes the language breakdown, tech-debt flags, file tree, contributor
//! stats, architecture summary, and quality score, then upserts the result
//! row and marks the job done.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::Instrument;

use super::{reliability, WorkerContext};
use crate::db::chunks;
use crate::db::jobs::{self, AnalyzeCandidate};
use crate::db::models::CodeChunkRecord;
use crate::db::repositories;
use crate::db::results::{self, ResultUpsert};
use crate::llm::SummaryInput;
use crate::observability;
use crate::types::{JobStatus, Stage, StageError};

const LONG_FUNCTION_SPAN: i32 = 50;
const LONG_FUNCTION_CAP: usize = 50;
const MISSING_TESTS_CAP: usize = 20;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("No chunks available for analysis")]
    NoChunks,
}

impl AnalyzeError {
    pub fn code(&self) -> &'static str {
        match self {
            AnalyzeError::NoChunks => "NO_CHUNKS",
        }
    }
}

impl From<AnalyzeError> for StageError {
    fn from(error: AnalyzeError) -> Self {
        StageError::new(Stage::Analyzing, error.code(), error.to_string())
    }
}

fn todo_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(TODO|FIXME)\b").expect("valid pattern"))
}

/// Per-language byte shares of chunk content, rounded to two decimals and
/// ordered by descending share.
pub fn language_breakdown(chunks: &[CodeChunkRecord]) -> Value {
    let mut totals: BTreeMap<String, usize> = BTreeMap::new();
    for chunk in chunks {
        let language = chunk
            .language
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or("unknown")
            .to_lowercase();
        *totals.entry(language).or_insert(0) += chunk.content.len();
    }

    let total_size = totals.values().sum::<usize>().max(1);
    let mut entries: Vec<(String, usize)> = totals.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut breakdown = Map::new();
    for (language, size) in entries {
        let share = (size as f64 / total_size as f64) * 100.0;
        let rounded = (share * 100.0).round() / 100.0;
        breakdown.insert(language, Value::from(rounded));
    }
    Value::Object(breakdown)
}

fn is_test_path(lower_path: &str) -> bool {
    lower_path.contains("/tests/") || lower_path.starts_with("tests/") || lower_path.contains("test_")
}

/// Long-function flags, TODO/FIXME density, and untested-file candidates.
pub fn detect_tech_debt(chunks: &[CodeChunkRecord]) -> Value {
    let mut long_functions: Vec<Value> = Vec::new();
    let mut todo_count: usize = 0;
    let mut source_files: BTreeMap<String, ()> = BTreeMap::new();
    let mut has_test_files = false;

    for chunk in chunks {
        let lower_path = chunk.file_path.to_lowercase();
        source_files.insert(chunk.file_path.clone(), ());
        if is_test_path(&lower_path) {
            has_test_files = true;
        }

        if let (Some(start), Some(end)) = (chunk.start_line, chunk.end_line) {
            let span = end - start + 1;
            if span > LONG_FUNCTION_SPAN {
                long_functions.push(serde_json::json!({
                    "file": chunk.file_path,
                    "line": start,
                    "length": span,
                }));
            }
        }

        todo_count += todo_pattern().find_iter(&chunk.content).count();
    }

    long_functions.truncate(LONG_FUNCTION_CAP);

    let missing_tests: Vec<String> = if has_test_files {
        Vec::new()
    } else {
        source_files.keys().take(MISSING_TESTS_CAP).cloned().collect()
    };

    serde_json::json!({
        "long_functions": long_functions,
        "todo_count": todo_count,
        "missing_tests": missing_tests,
    })
}

/// Per-path `{chunks, lines, language}` aggregation.
pub fn build_file_tree(chunks: &[CodeChunkRecord]) -> Value {
    #[derive(Default)]
    struct FileMetrics {
        chunks: usize,
        lines: i32,
        language: Option<String>,
    }

    let mut metrics: BTreeMap<String, FileMetrics> = BTreeMap::new();
    for chunk in chunks {
        let entry = metrics.entry(chunk.file_path.clone()).or_default();
        entry.chunks += 1;
        if let (Some(start), Some(end)) = (chunk.start_line, chunk.end_line) {
            entry.lines += (end - start + 1).max(0);
        }
        if entry.language.is_none() {
            entry.language = Some(
                chunk
                    .language
                    .clone()
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| "unknown".to_string()),
            );
        }
    }

    let mut files = Map::new();
    for (path, entry) in metrics {
        files.insert(
            path,
            serde_json::json!({
                "chunks": entry.chunks,
                "lines": entry.lines,
                "language": entry.language.unwrap_or_else(|| "unknown".to_string()),
            }),
        );
    }
    serde_json::json!({ "files": files })
}

/// Start at 100, subtract debt penalties, add the README bonus, clamp.
pub fn compute_quality_score(tech_debt: &Value, file_tree: &Value) -> i32 {
    let mut score: i64 = 100;

    let todo_count = tech_debt
        .get("todo_count")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    score -= todo_count.min(30);

    let long_functions = tech_debt
        .get("long_functions")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0) as i64;
    score -= (long_functions * 2).min(30);

    let missing_tests = tech_debt
        .get("missing_tests")
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    if missing_tests {
        score -= 20;
    }

    let has_readme = file_tree
        .get("files")
        .and_then(Value::as_object)
        .map(|files| files.keys().any(|path| path.to_lowercase().ends_with("readme.md")))
        .unwrap_or(false);
    if has_readme {
        score += 5;
    }

    score.clamp(0, 100) as i32
}

fn summary_input(candidate: &AnalyzeCandidate, breakdown: &Value, chunks: &[CodeChunkRecord]) -> SummaryInput {
    let unique_paths: Vec<String> = chunks
        .iter()
        .map(|c| c.file_path.clone())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let top_language = breakdown
        .as_object()
        .and_then(|m| m.keys().next())
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    SummaryInput {
        full_name: candidate.full_name.clone(),
        default_branch: candidate.default_branch.clone(),
        top_language,
        language_breakdown: breakdown.clone(),
        unique_path_count: unique_paths.len(),
        chunk_count: chunks.len(),
        top_paths: unique_paths.into_iter().take(25).collect(),
    }
}

/// Claim and process the next analyze-eligible job, if any.
pub async fn process_next(context: &WorkerContext) -> Result<bool, sqlx::Error> {
    let Some(candidate) = jobs::next_analyze_candidate(&context.pool).await? else {
        return Ok(false);
    };

    let claimed = jobs::claim(
        &context.pool,
        candidate.job_id,
        &[JobStatus::Analyzing],
        JobStatus::Analyzing,
        10,
    )
    .await?;
    if !claimed {
        return Ok(true);
    }

    run_analyze_job(context, &candidate).await;
    Ok(true)
}

async fn run_analyze_job(context: &WorkerContext, candidate: &AnalyzeCandidate) {
    let started = Instant::now();
    let span = tracing::info_span!(
        "worker.analyze",
        job_id = %candidate.job_id,
        repo_id = %candidate.repo_id
    );

    match analyze_job(context, candidate).instrument(span).await {
        Ok(()) => {
            observability::record_stage_duration("analyzing", "success", started.elapsed().as_secs_f64());
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
            observability::record_stage_duration("analyzing", "error", started.elapsed().as_secs_f64());
        }
    }
}

async fn analyze_job(context: &WorkerContext, candidate: &AnalyzeCandidate) -> Result<(), StageError> {
    let all_chunks = chunks::load_for_repo(&context.pool, candidate.repo_id)
        .await
        .map_err(|e| StageError::unexpected(Stage::Analyzing, e.to_string()))?;
    if all_chunks.is_empty() {
        return Err(AnalyzeError::NoChunks.into());
    }

    let breakdown = language_breakdown(&all_chunks);
    let tech_debt = detect_tech_debt(&all_chunks);
    let file_tree = build_file_tree(&all_chunks);
    let contributors = context.github.contributor_stats(&candidate.full_name).await;
    let summary = context
        .summarizer
        .generate(&summary_input(candidate, &breakdown, &all_chunks))
        .await;
    let quality_score = compute_quality_score(&tech_debt, &file_tree);

    jobs::update_status(&context.pool, candidate.job_id, JobStatus::Analyzing, 80)
        .await
        .map_err(|e| StageError::unexpected(Stage::Analyzing, e.to_string()))?;

    results::upsert_for_job(
        &context.pool,
        &ResultUpsert {
            repo_id: candidate.repo_id,
            job_id: candidate.job_id,
            architecture_summary: summary,
            quality_score,
            language_breakdown: breakdown,
            contributor_stats: contributors,
            tech_debt_flags: tech_debt,
            file_tree,
        },
    )
    .await
    .map_err(|e| StageError::unexpected(Stage::Analyzing, e.to_string()))?;

    jobs::mark_done(&context.pool, candidate.job_id)
        .await
        .map_err(|e| StageError::unexpected(Stage::Analyzing, e.to_string()))?;
    repositories::mark_analyzed(&context.pool, candidate.repo_id)
        .await
        .map_err(|e| StageError::unexpected(Stage::Analyzing, e.to_string()))?;

    tracing::info!(quality_score, "analyze stage complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn chunk(path: &str, language: &str, content: &str, span: Option<(i32, i32)>) -> CodeChunkRecord {
        CodeChunkRecord {
            id: Uuid::new_v4(),
            repo_id: Uuid::new_v4(),
            file_path: path.to_string(),
            start_line: span.map(|(s, _)| s),
            end_line: span.map(|(_, e)| e),
            content: content.to_string(),
            language: Some(language.to_string()),
            qdrant_point_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn breakdown_orders_languages_by_share() {
        let chunks = vec![
            chunk("a.py", "py", &"x".repeat(300), Some((1, 10))),
            chunk("b.rs", "rs", &"y".repeat(700), Some((1, 10))),
        ];
        let breakdown = language_breakdown(&chunks);
        let entries: Vec<(&String, f64)> = breakdown
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k, v.as_f64().unwrap()))
            .collect();
        assert_eq!(entries[0].0, "rs");
        assert_eq!(entries[0].1, 70.0);
        assert_eq!(entries[1].0, "py");
        assert_eq!(entries[1].1, 30.0);
    }

    #[test]
    fn breakdown_handles_missing_language() {
        let mut anonymous = chunk("a.xyz", "", "data", Some((1, 2)));
        anonymous.language = None;
        let breakdown = language_breakdown(&[anonymous]);
        assert!(breakdown.as_object().unwrap().contains_key("unknown"));
    }

    #[test]
    fn tech_debt_counts_todos_case_insensitively() {
        let chunks = vec![chunk(
            "src/lib.rs",
            "rs",
            "// TODO fix\n// fixme later\n// NOTODO is no match\n// todos neither",
            Some((1, 4)),
        )];
        let debt = detect_tech_debt(&chunks);
        assert_eq!(debt["todo_count"], 2);
    }

    #[test]
    fn tech_debt_flags_long_spans() {
        let chunks = vec![
            chunk("src/big.rs", "rs", "x", Some((1, 80))),
            chunk("src/small.rs", "rs", "y", Some((1, 20))),
        ];
        let debt = detect_tech_debt(&chunks);
        let long_functions = debt["long_functions"].as_array().unwrap();
        assert_eq!(long_functions.len(), 1);
        assert_eq!(long_functions[0]["file"], "src/big.rs");
        assert_eq!(long_functions[0]["length"], 80);
    }

    #[test]
    fn missing_tests_empties_when_tests_exist() {
        let with_tests = vec![
            chunk("src/lib.rs", "rs", "x", Some((1, 10))),
            chunk("tests/integration.rs", "rs", "x", Some((1, 10))),
        ];
        assert!(detect_tech_debt(&with_tests)["missing_tests"]
            .as_array()
            .unwrap()
            .is_empty());

        let without_tests = vec![chunk("src/lib.rs", "rs", "x", Some((1, 10)))];
        assert_eq!(
            detect_tech_debt(&without_tests)["missing_tests"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_prefixed_files_count_as_tests() {
        let chunks = vec![chunk("src/test_helpers.py", "py", "x", Some((1, 10)))];
        assert!(detect_tech_debt(&chunks)["missing_tests"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn file_tree_aggregates_chunks_and_lines() {
        let chunks = vec![
            chunk("src/lib.rs", "rs", "x", Some((1, 80))),
            chunk("src/lib.rs", "rs", "y", Some((61, 120))),
        ];
        let tree = build_file_tree(&chunks);
        let entry = &tree["files"]["src/lib.rs"];
        assert_eq!(entry["chunks"], 2);
        assert_eq!(entry["lines"], 140);
        assert_eq!(entry["language"], "rs");
    }

    #[test]
    fn quality_score_applies_each_penalty() {
        let debt = serde_json::json!({
            "todo_count": 12,
            "long_functions": [{"file": "a", "line": 1, "length": 90}],
            "missing_tests": ["src/lib.rs"],
        });
        let tree = serde_json::json!({"files": {"src/lib.rs": {}}});
        // 100 - 12 - 2 - 20 = 66
        assert_eq!(compute_quality_score(&debt, &tree), 66);
    }

    #[test]
    fn quality_score_penalties_are_capped() {
        let many_long: Vec<Value> = (0..40)
            .map(|i| serde_json::json!({"file": format!("f{i}"), "line": 1, "length": 90}))
            .collect();
        let debt = serde_json::json!({
            "todo_count": 500,
            "long_functions": many_long,
            "missing_tests": [],
        });
        let tree = serde_json::json!({"files": {}});
        // 100 - 30 (capped) - 30 (capped) = 40
        assert_eq!(compute_quality_score(&debt, &tree), 40);
    }

    #[test]
    fn readme_bonus_and_clamping() {
        let clean = serde_json::json!({
            "todo_count": 0,
            "long_functions": [],
            "missing_tests": [],
        });
        let tree = serde_json::json!({"files": {"README.md": {}, "src/lib.rs": {}}});
        // 100 + 5 clamps back to 100.
        assert_eq!(compute_quality_score(&clean, &tree), 100);

        let disaster = serde_json::json!({
            "todo_count": 100,
            "long_functions": (0..40).map(|i| serde_json::json!({"file": format!("f{i}")})).collect::<Vec<_>>(),
            "missing_tests": ["a"],
        });
        let bare = serde_json::json!({"files": {}});
        // 100 - 30 - 30 - 20 = 20, stays within [0, 100].
        assert_eq!(compute_quality_score(&disaster, &bare), 20);
    }
}
