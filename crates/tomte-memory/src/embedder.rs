// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

/// Produces dense vectors for chunk and query text.
///
/// The daemon plugs in a real embedding model; everything in this crate
/// only relies on the contract that equal inputs produce equal vectors
/// of a fixed dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Deterministic bag-of-words embedder.
///
/// Hashes each token into a fixed-size bucket histogram and L2-normalizes
/// the result.  No model, no network: overlapping vocabulary yields
/// cosine similarity, which is all the indexer and searcher need.  Used
/// by tests and as an offline fallback.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = fnv1a(&token.to_lowercase()) as usize % self.dimension;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for b in s.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn equal_inputs_give_equal_vectors() {
        let e = HashEmbedder::default();
        let out = e
            .embed(&["the quick brown fox".into(), "the quick brown fox".into()])
            .await
            .unwrap();
        assert_eq!(out[0], out[1]);
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let e = HashEmbedder::default();
        let out = e.embed(&["some words here".into()]).await.unwrap();
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn overlapping_text_is_more_similar_than_disjoint() {
        let e = HashEmbedder::default();
        let out = e
            .embed(&[
                "workspace security configuration".into(),
                "security configuration of the workspace".into(),
                "bananas oranges apples".into(),
            ])
            .await
            .unwrap();
        let near = cosine(&out[0], &out[1]);
        let far = cosine(&out[0], &out[2]);
        assert!(near > far, "shared vocabulary must score higher");
    }

    #[tokio::test]
    async fn empty_text_is_the_zero_vector() {
        let e = HashEmbedder::default();
        let out = e.embed(&["".into()]).await.unwrap();
        assert!(out[0].iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn dimension_matches_contract() {
        let e = HashEmbedder::new(64);
        let out = e.embed(&["abc".into()]).await.unwrap();
        assert_eq!(out[0].len(), 64);
        assert_eq!(e.dimension(), 64);
    }

    #[tokio::test]
    async fn case_is_folded() {
        let e = HashEmbedder::default();
        let out = e.embed(&["Hello World".into(), "hello world".into()]).await.unwrap();
        assert_eq!(out[0], out[1]);
    }
}
