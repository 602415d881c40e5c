//! Parsing stage: clone, walk, chunk, persist
//!
//! Clones the repository at the recorded commit into a scratch directory,
//! windows every accepted source file into overlapping line chunks, and
//! atomically replaces the repository's chunk set. The scratch directory is
//! removed on every exit path.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;
use walkdir::WalkDir;

use super::{reliability, WorkerContext};
use crate::db::chunks::{self, NewChunk};
use crate::db::jobs::{self, ParseCandidate};
use crate::observability;
use crate::types::{JobStatus, Stage, StageError};

const SKIP_DIRS: [&str; 7] = [
    ".git",
    "node_modules",
    ".venv",
    "venv",
    "dist",
    "build",
    "__pycache__",
];

const ALLOWED_EXTENSIONS: [&str; 15] = [
    "py", "js", "ts", "tsx", "jsx", "go", "java", "cpp", "c", "h", "hpp", "rs", "php", "rb", "cs",
];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Repository clone timed out")]
    CloneTimeout,

    #[error("Command failed: {0}")]
    CloneFailed(String),

    #[error("Repo has {found} source files; limit is {limit}")]
    FileLimitExceeded { found: usize, limit: usize },

    #[error("Chunk limit exceeded: {0}")]
    ChunkLimitExceeded(usize),

    #[error("Chunk size must be greater than overlap size")]
    InvalidChunkConfig,
}

impl ParseError {
    pub fn code(&self) -> &'static str {
        match self {
            ParseError::CloneTimeout => "CLONE_TIMEOUT",
            ParseError::CloneFailed(_) => "CLONE_FAILED",
            ParseError::FileLimitExceeded { .. } => "FILE_LIMIT_EXCEEDED",
            ParseError::ChunkLimitExceeded(_) => "CHUNK_LIMIT_EXCEEDED",
            ParseError::InvalidChunkConfig => "INVALID_CHUNK_CONFIG",
        }
    }
}

impl From<ParseError> for StageError {
    fn from(error: ParseError) -> Self {
        StageError::new(Stage::Parsing, error.code(), error.to_string())
    }
}

/// Split content into overlapping line windows.
///
/// Windows are `(start_line, end_line, content)` with 1-based inclusive
/// lines; consecutive windows share `overlap` lines.
pub fn chunk_windows(
    content: &str,
    window: usize,
    overlap: usize,
) -> Result<Vec<(i32, i32, String)>, ParseError> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Ok(Vec::new());
    }
    if window <= overlap {
        return Err(ParseError::InvalidChunkConfig);
    }

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window).min(lines.len());
        windows.push((start as i32 + 1, end as i32, lines[start..end].join("\n")));
        if end == lines.len() {
            break;
        }
        start = end - overlap;
    }

    Ok(windows)
}

/// Walk the tree, skipping vendored/derived directories, and collect files
/// with an accepted source extension in a deterministic order.
pub fn collect_source_files(root: &Path) -> Vec<std::path::PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy();
                !SKIP_DIRS.contains(&name.as_ref())
            } else {
                true
            }
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}

async fn run_git(args: &[&str], cwd: Option<&Path>, timeout: Duration) -> Result<(), ParseError> {
    let mut command = tokio::process::Command::new("git");
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| ParseError::CloneTimeout)?
        .map_err(|e| ParseError::CloneFailed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ParseError::CloneFailed(stderr.chars().take(300).collect()));
    }
    Ok(())
}

/// Shallow-clone the repository at the recorded commit into `target`.
async fn clone_repo(
    github_url: &str,
    commit_sha: &str,
    target: &Path,
    timeout: Duration,
) -> Result<(), ParseError> {
    let target_str = target.display().to_string();
    run_git(
        &["clone", "--depth", "1", github_url, target_str.as_str()],
        None,
        timeout,
    )
    .await?;
    run_git(
        &["fetch", "--depth", "1", "origin", commit_sha],
        Some(target),
        timeout,
    )
    .await?;
    run_git(&["checkout", commit_sha], Some(target), timeout).await
}

/// Claim and process the next parse-eligible job, if any.
pub async fn process_next(context: &WorkerContext) -> Result<bool, sqlx::Error> {
    let Some(candidate) = jobs::next_parse_candidate(&context.pool).await? else {
        return Ok(false);
    };

    let claimed = jobs::claim(
        &context.pool,
        candidate.job_id,
        &[JobStatus::Queued, JobStatus::Parsing],
        JobStatus::Parsing,
        10,
    )
    .await?;
    if !claimed {
        // Another replica won the race; the poll loop will look again.
        return Ok(true);
    }

    run_parse_job(context, &candidate).await;
    Ok(true)
}

async fn run_parse_job(context: &WorkerContext, candidate: &ParseCandidate) {
    let started = Instant::now();
    let span = tracing::info_span!(
        "worker.parse",
        job_id = %candidate.job_id,
        repo_id = %candidate.repo_id
    );

    let result = parse_job(context, candidate).instrument(span).await;
    match result {
        Ok(()) => {
            observability::record_stage_duration("parsing", "success", started.elapsed().as_secs_f64());
        }
        Err(error) => {
            let metadata = serde_json::json!({
                "github_url": candidate.github_url,
                "commit_sha": candidate.commit_sha,
            });
            if let Err(db_error) = reliability::schedule_retry_or_dead_letter(
                &context.pool,
                &context.config.worker,
                candidate.job_id,
                candidate.repo_id,
                &error,
                metadata,
            )
            .await
            {
                tracing::error!(%db_error, "failed to persist retry/dead-letter state");
            }
            observability::record_stage_duration("parsing", "error", started.elapsed().as_secs_f64());
        }
    }
}

async fn parse_job(context: &WorkerContext, candidate: &ParseCandidate) -> Result<(), StageError> {
    let parse_config = &context.config.parse;
    let clone_timeout = Duration::from_secs(parse_config.clone_timeout_seconds);

    // TempDir removal on drop covers every exit path, including retries.
    let scratch = tempfile::Builder::new()
        .prefix("devlens-parse-")
        .tempdir()
        .map_err(|e| StageError::unexpected(Stage::Parsing, e.to_string()))?;

    clone_repo(
        &candidate.github_url,
        &candidate.commit_sha,
        scratch.path(),
        clone_timeout,
    )
    .await
    .map_err(StageError::from)?;

    jobs::update_status(&context.pool, candidate.job_id, JobStatus::Parsing, 30)
        .await
        .map_err(|e| StageError::unexpected(Stage::Parsing, e.to_string()))?;

    let files = collect_source_files(scratch.path());
    if files.len() > parse_config.max_files {
        return Err(ParseError::FileLimitExceeded {
            found: files.len(),
            limit: parse_config.max_files,
        }
        .into());
    }

    let mut new_chunks: Vec<NewChunk> = Vec::new();
    for file_path in &files {
        let relative = file_path
            .strip_prefix(scratch.path())
            .unwrap_or(file_path)
            .to_string_lossy()
            .replace('\\', "/");
        let language = file_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();

        let bytes = std::fs::read(file_path)
            .map_err(|e| StageError::unexpected(Stage::Parsing, e.to_string()))?;
        let content = String::from_utf8_lossy(&bytes);

        for (start_line, end_line, chunk_content) in chunk_windows(
            &content,
            parse_config.chunk_lines,
            parse_config.chunk_overlap_lines,
        )
        .map_err(StageError::from)?
        {
            new_chunks.push(NewChunk {
                id: Uuid::new_v4(),
                file_path: relative.clone(),
                start_line,
                end_line,
                content: chunk_content,
                language: language.clone(),
            });
            if new_chunks.len() > parse_config.max_chunks {
                return Err(ParseError::ChunkLimitExceeded(parse_config.max_chunks).into());
            }
        }
    }

    jobs::update_status(&context.pool, candidate.job_id, JobStatus::Parsing, 80)
        .await
        .map_err(|e| StageError::unexpected(Stage::Parsing, e.to_string()))?;

    chunks::replace_for_repo(&context.pool, candidate.repo_id, &new_chunks)
        .await
        .map_err(|e| StageError::unexpected(Stage::Parsing, e.to_string()))?;

    tracing::info!(
        files = files.len(),
        chunks = new_chunks.len(),
        "parse stage complete"
    );

    jobs::update_status(&context.pool, candidate.job_id, JobStatus::Embedding, 100)
        .await
        .map_err(|e| StageError::unexpected(Stage::Parsing, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_all_lines_with_overlap() {
        let content = (1..=10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let windows = chunk_windows(&content, 4, 1).unwrap();
        assert_eq!(windows[0].0, 1);
        assert_eq!(windows[0].1, 4);
        assert_eq!(windows[1].0, 4);
        assert_eq!(windows[1].1, 7);
        assert_eq!(windows.last().unwrap().1, 10);
        // Every line appears in at least one window.
        for line in 1..=10 {
            assert!(windows.iter().any(|(s, e, _)| *s <= line && line <= *e));
        }
    }

    #[test]
    fn short_files_produce_one_window() {
        let windows = chunk_windows("a\nb", 80, 20).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0], (1, 2, "a\nb".to_string()));
    }

    #[test]
    fn empty_content_produces_no_windows() {
        assert!(chunk_windows("", 80, 20).unwrap().is_empty());
    }

    #[test]
    fn window_must_exceed_overlap() {
        let error = chunk_windows("a\nb\nc", 10, 10).unwrap_err();
        assert_eq!(error.code(), "INVALID_CHUNK_CONFIG");
        assert!(chunk_windows("a\nb\nc", 5, 10).is_err());
    }

    #[test]
    fn window_content_matches_line_range() {
        let content = "alpha\nbeta\ngamma\ndelta\nepsilon";
        let windows = chunk_windows(content, 3, 1).unwrap();
        assert_eq!(windows[0].2, "alpha\nbeta\ngamma");
        assert_eq!(windows[1].2, "gamma\ndelta\nepsilon");
    }

    #[test]
    fn walker_skips_vendored_dirs_and_foreign_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("src/notes.md"), "# notes").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(root.join(".git/config.py"), "x").unwrap();

        let files = collect_source_files(root);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/main.rs"));
    }

    #[test]
    fn walker_accepts_uppercase_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Legacy.PY"), "print(1)").unwrap();
        assert_eq!(collect_source_files(dir.path()).len(), 1);
    }

    #[test]
    fn parse_error_codes_are_stable() {
        assert_eq!(ParseError::CloneTimeout.code(), "CLONE_TIMEOUT");
        assert_eq!(
            ParseError::FileLimitExceeded { found: 3, limit: 2 }.code(),
            "FILE_LIMIT_EXCEEDED"
        );
        let stage_error: StageError = ParseError::ChunkLimitExceeded(100).into();
        assert_eq!(stage_error.to_string(), "CHUNK_LIMIT_EXCEEDED: Chunk limit exceeded: 100");
    }
}
