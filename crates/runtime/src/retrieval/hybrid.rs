//! Deterministic hybrid reranking
//!
//! Gathers 2x candidates from the lexical and dense sides, merges them by
//! chunk id, min-max normalizes each score axis independently, folds in the
//! query/path token overlap, and sorts by `(-rerank_score, chunk_id)`.
//!
//! The weights (0.45 / 0.35 / 0.20), the `[a-z0-9_]+` tokenizer, and the
//! chunk-id tie-break are load-bearing: identical corpora must produce
//! bit-for-bit identical orderings and scores.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use sqlx::PgPool;
use uuid::Uuid;

use super::{clamp_limit, dense, lexical, DenseHit, LexicalHit, RetrievalError};

const DENSE_WEIGHT: f64 = 0.45;
const LEXICAL_WEIGHT: f64 = 0.35;
const OVERLAP_WEIGHT: f64 = 0.20;

static TOKEN_PATTERN: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct HybridHit {
    pub chunk_id: Uuid,
    pub file_path: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub language: Option<String>,
    pub dense_score: f64,
    pub lexical_score: f64,
    pub rerank_score: f64,
}

/// Tokenize into lowercase `[a-z0-9_]+` runs.
fn tokenize(text: &str) -> HashSet<String> {
    let pattern = TOKEN_PATTERN
        .get_or_init(|| Regex::new(r"[a-zA-Z0-9_]+").expect("tokenizer pattern is valid"));
    pattern
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Min-max normalize a score axis across the merged candidate set.
/// A degenerate axis (max == min) normalizes every entry to 1.0.
fn normalize(values: &BTreeMap<Uuid, f64>) -> BTreeMap<Uuid, f64> {
    if values.is_empty() {
        return BTreeMap::new();
    }
    let min = values.values().cloned().fold(f64::INFINITY, f64::min);
    let max = values.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return values.keys().map(|k| (*k, 1.0)).collect();
    }
    values
        .iter()
        .map(|(k, v)| (*k, (v - min) / (max - min)))
        .collect()
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// The weighted rerank formula over normalized inputs.
pub fn rerank_score(dense_norm: f64, lexical_norm: f64, overlap: f64) -> f64 {
    round6(DENSE_WEIGHT * dense_norm + LEXICAL_WEIGHT * lexical_norm + OVERLAP_WEIGHT * overlap)
}

/// Merge both candidate sets and compute the final ordering.
pub fn merge_and_rerank(
    query: &str,
    lexical: Vec<LexicalHit>,
    dense: Vec<DenseHit>,
    limit: usize,
) -> Vec<HybridHit> {
    let mut merged: BTreeMap<Uuid, HybridHit> = BTreeMap::new();

    for hit in lexical {
        merged.insert(
            hit.chunk_id,
            HybridHit {
                chunk_id: hit.chunk_id,
                file_path: Some(hit.file_path),
                start_line: hit.start_line,
                end_line: hit.end_line,
                language: hit.language,
                dense_score: 0.0,
                lexical_score: hit.score as f64,
                rerank_score: 0.0,
            },
        );
    }

    for hit in dense {
        match merged.get_mut(&hit.chunk_id) {
            Some(existing) => {
                existing.dense_score = hit.dense_score as f64;
                if existing.file_path.is_none() {
                    existing.file_path = hit.file_path;
                }
                if existing.language.is_none() {
                    existing.language = hit.language;
                }
            }
            None => {
                merged.insert(
                    hit.chunk_id,
                    HybridHit {
                        chunk_id: hit.chunk_id,
                        file_path: hit.file_path,
                        start_line: hit.start_line,
                        end_line: hit.end_line,
                        language: hit.language,
                        dense_score: hit.dense_score as f64,
                        lexical_score: 0.0,
                        rerank_score: 0.0,
                    },
                );
            }
        }
    }

    let dense_norm = normalize(&merged.iter().map(|(k, v)| (*k, v.dense_score)).collect());
    let lexical_norm = normalize(&merged.iter().map(|(k, v)| (*k, v.lexical_score)).collect());

    let query_terms = tokenize(query);
    for (chunk_id, hit) in merged.iter_mut() {
        let file_terms = tokenize(&format!(
            "{} {}",
            hit.file_path.as_deref().unwrap_or(""),
            hit.language.as_deref().unwrap_or("")
        ));
        let overlap = if !query_terms.is_empty() && !file_terms.is_empty() {
            query_terms.intersection(&file_terms).count() as f64 / query_terms.len() as f64
        } else {
            0.0
        };
        hit.rerank_score = rerank_score(
            dense_norm.get(chunk_id).copied().unwrap_or(0.0),
            lexical_norm.get(chunk_id).copied().unwrap_or(0.0),
            overlap,
        );
    }

    let mut ranked: Vec<HybridHit> = merged.into_values().collect();
    ranked.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    ranked.truncate(limit);
    ranked
}

/// Run the full hybrid pipeline for a repository-scoped query.
pub async fn search(
    pool: &PgPool,
    qdrant: &qdrant_client::Qdrant,
    collection: &str,
    vector_size: usize,
    repo_id: Uuid,
    query: &str,
    limit: usize,
) -> Result<Vec<HybridHit>, RetrievalError> {
    let q = query.trim();
    if q.is_empty() {
        return Err(RetrievalError::EmptyQuery);
    }
    let safe_limit = clamp_limit(limit);

    let lexical = lexical::search(pool, repo_id, q, safe_limit * 2).await?;
    let dense = dense::search(qdrant, collection, vector_size, repo_id, q, safe_limit * 2).await?;

    Ok(merge_and_rerank(q, lexical, dense, safe_limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexical_hit(chunk_id: Uuid, path: &str, score: f32) -> LexicalHit {
        LexicalHit {
            chunk_id,
            file_path: path.to_string(),
            start_line: Some(1),
            end_line: Some(40),
            language: Some("rs".to_string()),
            score,
        }
    }

    fn dense_hit(chunk_id: Uuid, path: &str, score: f32) -> DenseHit {
        DenseHit {
            chunk_id,
            file_path: Some(path.to_string()),
            start_line: Some(1),
            end_line: Some(40),
            language: Some("rs".to_string()),
            dense_score: score,
        }
    }

    #[test]
    fn rerank_formula_matches_reference_values() {
        assert_eq!(rerank_score(0.9, 0.0, 0.0), 0.405);
        assert_eq!(rerank_score(0.0, 1.0, 1.0), 0.55);
        // The chunk strong on lexical+overlap outranks the dense-only one.
        assert!(rerank_score(0.0, 1.0, 1.0) > rerank_score(0.9, 0.0, 0.0));
    }

    #[test]
    fn tokenizer_lowercases_and_splits_on_non_word() {
        let tokens = tokenize("src/Auth-Refresh.rs rs");
        assert!(tokens.contains("src"));
        assert!(tokens.contains("auth"));
        assert!(tokens.contains("refresh"));
        assert!(tokens.contains("rs"));
        assert!(!tokens.contains("Auth"));
    }

    #[test]
    fn degenerate_axis_normalizes_to_one() {
        let mut values = BTreeMap::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        values.insert(a, 0.7);
        values.insert(b, 0.7);
        let normalized = normalize(&values);
        assert_eq!(normalized[&a], 1.0);
        assert_eq!(normalized[&b], 1.0);
    }

    #[test]
    fn one_sided_candidates_get_zero_on_the_other_axis() {
        let only_lexical = Uuid::new_v4();
        let only_dense = Uuid::new_v4();
        let ranked = merge_and_rerank(
            "query",
            vec![lexical_hit(only_lexical, "a.rs", 0.8)],
            vec![dense_hit(only_dense, "b.rs", 0.9)],
            10,
        );
        assert_eq!(ranked.len(), 2);
        let lex = ranked.iter().find(|h| h.chunk_id == only_lexical).unwrap();
        let den = ranked.iter().find(|h| h.chunk_id == only_dense).unwrap();
        assert_eq!(lex.dense_score, 0.0);
        assert_eq!(den.lexical_score, 0.0);
    }

    #[test]
    fn ties_break_on_chunk_id() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        // Identical scores on every axis.
        let ranked = merge_and_rerank(
            "query",
            vec![lexical_hit(b, "same.rs", 0.5), lexical_hit(a, "same.rs", 0.5)],
            vec![],
            10,
        );
        assert_eq!(ranked[0].chunk_id, a);
        assert_eq!(ranked[1].chunk_id, b);
    }

    #[test]
    fn reranking_is_deterministic_across_runs() {
        let ids: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let lexical: Vec<LexicalHit> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| lexical_hit(*id, &format!("src/file_{i}.rs"), 0.1 * i as f32))
            .collect();
        let dense: Vec<DenseHit> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| dense_hit(*id, &format!("src/file_{i}.rs"), 1.0 - 0.1 * i as f32))
            .collect();

        let first = merge_and_rerank("file_3 rs", lexical.clone(), dense.clone(), 6);
        let second = merge_and_rerank("file_3 rs", lexical, dense, 6);

        let order_a: Vec<Uuid> = first.iter().map(|h| h.chunk_id).collect();
        let order_b: Vec<Uuid> = second.iter().map(|h| h.chunk_id).collect();
        assert_eq!(order_a, order_b);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.rerank_score.to_bits(), b.rerank_score.to_bits());
        }
    }

    #[test]
    fn overlap_rewards_matching_paths() {
        let matching = Uuid::new_v4();
        let other = Uuid::new_v4();
        let ranked = merge_and_rerank(
            "auth refresh",
            vec![
                lexical_hit(matching, "src/auth/refresh.rs", 0.5),
                lexical_hit(other, "src/unrelated.rs", 0.5),
            ],
            vec![],
            10,
        );
        assert_eq!(ranked[0].chunk_id, matching);
        assert!(ranked[0].rerank_score > ranked[1].rerank_score);
    }

    #[test]
    fn underscored_path_tokens_stay_whole() {
        // `refresh_tokens` is a single token; the bare words do not match it.
        let tokens = tokenize("src/auth/refresh_tokens.rs");
        assert!(tokens.contains("refresh_tokens"));
        assert!(!tokens.contains("refresh"));
        assert!(!tokens.contains("tokens"));
    }
}
