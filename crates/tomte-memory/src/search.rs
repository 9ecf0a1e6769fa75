// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::Serialize;
use tomte_config::SearchConfig;
use tracing::debug;

use crate::embedder::Embedder;
use crate::store::VectorStore;

/// How many candidates each side contributes to the merge.
const FETCH_K: usize = 20;

/// One merged search hit, scored in `[0, 1]`-ish units (weights permitting).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub snippet: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
}

/// Search tunables, usually taken straight from the config.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub min_score: f32,
    pub max_results: usize,
}

impl From<&SearchConfig> for SearchParams {
    fn from(cfg: &SearchConfig) -> Self {
        Self {
            vector_weight: cfg.hybrid_weights.vector,
            keyword_weight: cfg.hybrid_weights.keyword,
            min_score: cfg.min_score,
            max_results: cfg.max_results,
        }
    }
}

#[derive(Debug, Default)]
struct Candidate {
    path: String,
    snippet: String,
    start_line: usize,
    end_line: usize,
    vector_score: f32,
    keyword_score: f32,
}

/// Merge vector and keyword top-K into one score-sorted result list.
///
/// Vector scores are `1 − distance` clipped to `[0, 1]`; keyword scores
/// are `|bm25| / max|bm25|` so the best keyword hit always normalizes to
/// 1.0.  A chunk present on only one side contributes 0 for the other.
/// Ordering is deterministic: score descending, then chunk id.
pub async fn hybrid_search(
    query: &str,
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    params: &SearchParams,
) -> anyhow::Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let fetch_k = FETCH_K.max(params.max_results);
    let query_embedding = embedder
        .embed(std::slice::from_ref(&query.to_string()))
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();

    let vector_hits = store.search_vector(&query_embedding, fetch_k)?;
    let keyword_hits = store.search_keyword(query, fetch_k)?;
    debug!(
        vector = vector_hits.len(),
        keyword = keyword_hits.len(),
        "hybrid search candidates"
    );

    let mut merged: HashMap<String, Candidate> = HashMap::new();

    for hit in vector_hits {
        let entry = merged.entry(hit.id).or_default();
        entry.path = hit.path;
        entry.snippet = hit.text;
        entry.start_line = hit.start_line;
        entry.end_line = hit.end_line;
        entry.vector_score = (1.0 - hit.distance).clamp(0.0, 1.0);
    }

    let max_abs_rank = keyword_hits
        .iter()
        .map(|h| h.rank.abs())
        .fold(0.0f64, f64::max);
    for hit in keyword_hits {
        let score = if max_abs_rank > 0.0 {
            (hit.rank.abs() / max_abs_rank) as f32
        } else {
            0.0
        };
        let entry = merged.entry(hit.id).or_default();
        if entry.snippet.is_empty() {
            entry.path = hit.path;
            entry.snippet = hit.text;
            entry.start_line = hit.start_line;
            entry.end_line = hit.end_line;
        }
        entry.keyword_score = score;
    }

    let mut results: Vec<(String, SearchResult)> = merged
        .into_iter()
        .map(|(id, c)| {
            let score =
                params.vector_weight * c.vector_score + params.keyword_weight * c.keyword_score;
            (
                id,
                SearchResult {
                    path: c.path,
                    snippet: c.snippet,
                    start_line: c.start_line,
                    end_line: c.end_line,
                    score,
                },
            )
        })
        .filter(|(_, r)| r.score >= params.min_score)
        .collect();

    results.sort_by(|(id_a, a), (id_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| id_a.cmp(id_b))
    });
    results.truncate(params.max_results);
    Ok(results.into_iter().map(|(_, r)| r).collect())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
