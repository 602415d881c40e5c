//! Dense vector search against Qdrant
//!
//! Every query is scoped with a mandatory `repo_id` payload filter; an
//! unscoped search would leak chunks across repositories.

use qdrant_client::qdrant::{
    Condition, FieldCondition, Filter, Match, SearchPoints, Value as QdrantValue,
    WithPayloadSelector,
};
use qdrant_client::Qdrant;
use uuid::Uuid;

use super::{embedding, RetrievalError};

#[derive(Debug, Clone)]
pub struct DenseHit {
    pub chunk_id: Uuid,
    pub file_path: Option<String>,
    pub start_line: Option<i32>,
    pub end_line: Option<i32>,
    pub language: Option<String>,
    pub dense_score: f32,
}

fn repo_filter(repo_id: Uuid) -> Filter {
    Filter {
        should: vec![],
        min_should: None,
        must: vec![Condition {
            condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(
                FieldCondition {
                    key: "repo_id".to_string(),
                    r#match: Some(Match {
                        match_value: Some(qdrant_client::qdrant::r#match::MatchValue::Keyword(
                            repo_id.to_string(),
                        )),
                    }),
                    range: None,
                    geo_bounding_box: None,
                    geo_radius: None,
                    values_count: None,
                    geo_polygon: None,
                    datetime_range: None,
                    is_empty: None,
                    is_null: None,
                },
            )),
        }],
        must_not: vec![],
    }
}

fn extract_string(value: &QdrantValue) -> Option<String> {
    match &value.kind {
        Some(qdrant_client::qdrant::value::Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn extract_i32(value: &QdrantValue) -> Option<i32> {
    match &value.kind {
        Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)) => Some(*i as i32),
        Some(qdrant_client::qdrant::value::Kind::DoubleValue(d)) => Some(*d as i32),
        _ => None,
    }
}

pub async fn search(
    client: &Qdrant,
    collection: &str,
    vector_size: usize,
    repo_id: Uuid,
    query: &str,
    limit: usize,
) -> Result<Vec<DenseHit>, RetrievalError> {
    if repo_id.is_nil() {
        return Err(RetrievalError::MissingRepoFilter);
    }

    let vector = embedding::embed_query(query, vector_size);

    let search_points = SearchPoints {
        collection_name: collection.to_string(),
        vector,
        vector_name: None,
        filter: Some(repo_filter(repo_id)),
        limit: limit as u64,
        with_payload: Some(WithPayloadSelector {
            selector_options: Some(
                qdrant_client::qdrant::with_payload_selector::SelectorOptions::Enable(true),
            ),
        }),
        params: None,
        score_threshold: None,
        offset: None,
        with_vectors: None,
        read_consistency: None,
        shard_key_selector: None,
        sparse_indices: None,
        timeout: None,
    };

    let response = client
        .search_points(search_points)
        .await
        .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;

    let mut hits = Vec::new();
    for point in response.result {
        let payload = &point.payload;
        let chunk_id = payload
            .get("chunk_id")
            .and_then(extract_string)
            .and_then(|raw| Uuid::parse_str(&raw).ok());
        // Points without a chunk_id payload cannot be joined back to rows.
        let Some(chunk_id) = chunk_id else { continue };

        hits.push(DenseHit {
            chunk_id,
            file_path: payload.get("file_path").and_then(extract_string),
            start_line: payload.get("start_line").and_then(extract_i32),
            end_line: payload.get("end_line").and_then(extract_i32),
            language: payload.get("language").and_then(extract_string),
            dense_score: point.score,
        });
    }

    Ok(hits)
}
