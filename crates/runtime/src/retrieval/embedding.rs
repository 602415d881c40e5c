//! Deterministic hash-based embedders
//!
//! Both embedders are local and reproducible so retrieval tests never depend
//! on a model server. A real embedder is a drop-in replacement as long as it
//! honors the `text -> float[size]` contract (unit-norm for queries).

use sha2::{Digest, Sha256};

/// Embed chunk content for indexing.
///
/// Concatenates SHA-256 digests of `"{text}|{counter}"` and maps each
/// big-endian 4-byte word into [-1, 1].
pub fn embed_chunk_text(text: &str, size: usize) -> Vec<f32> {
    let mut result = Vec::with_capacity(size);
    let mut counter: u64 = 0;

    while result.len() < size {
        let digest = Sha256::digest(format!("{text}|{counter}").as_bytes());
        counter += 1;

        for word in digest.chunks(4) {
            if result.len() >= size {
                break;
            }
            let value = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
            result.push((value as f64 / 2147483647.5 - 1.0) as f32);
        }
    }

    result
}

pub fn embed_chunk_texts(texts: &[String], size: usize) -> Vec<Vec<f32>> {
    texts.iter().map(|t| embed_chunk_text(t, size)).collect()
}

/// Embed a search query into a unit-norm vector.
///
/// Cycles the SHA-256 digest of the query across the target dimension, maps
/// bytes into [-1, 1], then L2-normalizes.
pub fn embed_query(query: &str, size: usize) -> Vec<f32> {
    let digest = Sha256::digest(query.as_bytes());
    let mut vector: Vec<f32> = digest
        .iter()
        .cycle()
        .take(size)
        .map(|&b| (b as f32 / 255.0) * 2.0 - 1.0)
        .collect();

    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_embeddings_are_deterministic() {
        let a = embed_chunk_text("fn main() {}", 384);
        let b = embed_chunk_text("fn main() {}", 384);
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
    }

    #[test]
    fn chunk_embeddings_differ_between_texts() {
        assert_ne!(
            embed_chunk_text("alpha", 128),
            embed_chunk_text("beta", 128)
        );
    }

    #[test]
    fn chunk_embedding_values_are_bounded() {
        for value in embed_chunk_text("bounded", 512) {
            assert!((-1.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn query_embeddings_are_unit_norm() {
        let vector = embed_query("where is the auth refresh handled", 384);
        assert_eq!(vector.len(), 384);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn query_embeddings_are_deterministic() {
        assert_eq!(embed_query("same query", 64), embed_query("same query", 64));
        assert_ne!(embed_query("query a", 64), embed_query("query b", 64));
    }
}
