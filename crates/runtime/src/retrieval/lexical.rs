//! Lexical full-text search over code chunks
//!
//! Runs `plainto_tsquery` against the trigger-maintained `fts` column and
//! ranks with `ts_rank_cd`. This select stays raw SQL.

use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{clamp_limit, RetrievalError};

#[derive(Debug, Clone, FromRow)]
pub struct LexicalHit {
    pub chunk_id: Uuid,
    pub file_path: String,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub language: Option<String>,
    pub score: f32,
}

pub async fn search(
    pool: &PgPool,
    repo_id: Uuid,
    query: &str,
    limit: usize,
) -> Result<Vec<LexicalHit>, RetrievalError> {
    let q = query.trim();
    if q.is_empty() {
        return Err(RetrievalError::EmptyQuery);
    }
    let safe_limit = clamp_limit(limit);

    let hits = sqlx::query_as::<_, LexicalHit>(
        r#"
        SELECT id AS chunk_id,
               file_path,
               start_line,
               end_line,
               language,
               ts_rank_cd(fts, plainto_tsquery('english', $2)) AS score
        FROM code_chunks
        WHERE repo_id = $1
          AND fts @@ plainto_tsquery('english', $2)
        ORDER BY score DESC, file_path ASC, start_line ASC NULLS LAST
        LIMIT $3
        "#,
    )
    .bind(repo_id)
    .bind(q)
    .bind(safe_limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::super::clamp_limit;

    #[test]
    fn limits_clamp_into_range() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(20), 20);
        assert_eq!(clamp_limit(100), 100);
        assert_eq!(clamp_limit(500), 100);
    }
}
