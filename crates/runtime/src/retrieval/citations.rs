//! Citation formatting and validation
//!
//! A citation survives validation only when its chunk exists in the owning
//! repository, the path matches exactly, and the requested line range lies
//! within the stored chunk bounds.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::chunks;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub chunk_id: String,
    pub file_path: String,
    pub line_start: i32,
    pub line_end: i32,
    pub anchor: String,
    pub score: f64,
}

fn anchor(file_path: &str, start: i32, end: i32) -> String {
    format!("{file_path}#L{start}-L{end}")
}

/// Build a citation with a normalized line range and anchor.
pub fn format_citation(
    chunk_id: &str,
    file_path: &str,
    line_start: Option<i32>,
    line_end: Option<i32>,
    score: Option<f64>,
) -> Citation {
    let start = line_start.unwrap_or(1);
    let mut end = line_end.unwrap_or(start);
    if end < start {
        end = start;
    }
    Citation {
        chunk_id: chunk_id.to_string(),
        file_path: file_path.to_string(),
        line_start: start,
        line_end: end,
        anchor: anchor(file_path, start, end),
        score: score.unwrap_or(0.0),
    }
}

/// Keep only the citations that check out against the repository's chunks.
pub async fn validate_for_repo(
    pool: &PgPool,
    repo_id: Uuid,
    citations: &[Citation],
) -> sqlx::Result<Vec<Citation>> {
    let mut valid = Vec::new();

    for citation in citations {
        if citation.chunk_id.is_empty() || citation.file_path.is_empty() {
            continue;
        }
        let Ok(chunk_id) = Uuid::parse_str(&citation.chunk_id) else {
            continue;
        };
        let Some(row) = chunks::find_scoped(pool, chunk_id, repo_id).await? else {
            continue;
        };
        if row.file_path != citation.file_path {
            continue;
        }

        let db_start = row.start_line.unwrap_or(1);
        let db_end = row.end_line.unwrap_or(db_start);
        let c_start = citation.line_start;
        let c_end = citation.line_end;
        if c_start < db_start || c_end > db_end {
            continue;
        }

        valid.push(Citation {
            anchor: anchor(&citation.file_path, c_start, c_end),
            ..citation.clone()
        });
    }

    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_normalizes_missing_lines() {
        let citation = format_citation("c1", "src/lib.rs", None, None, None);
        assert_eq!(citation.line_start, 1);
        assert_eq!(citation.line_end, 1);
        assert_eq!(citation.anchor, "src/lib.rs#L1-L1");
    }

    #[test]
    fn format_clamps_inverted_ranges() {
        let citation = format_citation("c1", "src/lib.rs", Some(40), Some(12), Some(0.7));
        assert_eq!(citation.line_start, 40);
        assert_eq!(citation.line_end, 40);
        assert_eq!(citation.anchor, "src/lib.rs#L40-L40");
        assert_eq!(citation.score, 0.7);
    }

    #[test]
    fn format_keeps_valid_ranges() {
        let citation = format_citation("c1", "src/main.rs", Some(10), Some(30), Some(0.9));
        assert_eq!(citation.anchor, "src/main.rs#L10-L30");
    }
}
