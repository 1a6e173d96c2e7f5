//! BM25 and the heuristic boosts applied on top of it.

use crate::models::{CorpusStatistics, RankingConfig};

/// Minimum share of query terms a chunk must match once the query has two or
/// more terms.
pub const MIN_COVERAGE: f64 = 0.5;

/// Inverse document frequency with the `+1` smoothing that keeps it positive.
pub fn idf(total_chunks: u64, document_frequency: usize) -> f64 {
    let n = total_chunks as f64;
    let df = document_frequency as f64;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// Single-term BM25 contribution of one chunk.
pub fn bm25(
    term_frequency: u32,
    document_frequency: usize,
    chunk_token_count: u32,
    stats: &CorpusStatistics,
    ranking: &RankingConfig,
) -> f64 {
    let tf = f64::from(term_frequency);
    let length_ratio = if stats.average_chunk_token_count == 0 {
        1.0
    } else {
        f64::from(chunk_token_count) / stats.average_chunk_token_count as f64
    };

    let numerator = tf * (ranking.k1 + 1.0);
    let denominator = tf + ranking.k1 * (1.0 - ranking.b + ranking.b * length_ratio);
    if denominator <= 0.0 {
        return 0.0;
    }

    idf(stats.total_chunks, document_frequency) * numerator / denominator
}

pub fn coverage_boost(matched_terms: usize, query_terms: usize) -> f64 {
    if query_terms == 0 {
        return 1.0;
    }
    1.0 + 0.3 * (matched_terms as f64 / query_terms as f64)
}

pub fn density_boost(matched_terms: usize, chunk_token_count: u32) -> f64 {
    if chunk_token_count == 0 {
        return 1.2;
    }
    1.0 + (10.0 * matched_terms as f64 / f64::from(chunk_token_count)).min(0.2)
}

/// Stands in for positional proximity, which the index does not record:
/// shorter chunks keep matched terms closer together.
pub fn proximity_boost(chunk_token_count: u32) -> f64 {
    match chunk_token_count {
        0..=99 => 1.15,
        100..=199 => 1.10,
        200..=299 => 1.05,
        _ => 1.0,
    }
}

/// Applies the coverage filter and multiplies in every boost. Returns `None`
/// for chunks that cover too few of the query terms.
pub fn adjust_score(
    base_score: f64,
    matched_terms: usize,
    query_terms: usize,
    chunk_token_count: u32,
) -> Option<f64> {
    if query_terms >= 2 && (matched_terms as f64 / query_terms as f64) < MIN_COVERAGE {
        return None;
    }

    Some(
        base_score
            * coverage_boost(matched_terms, query_terms)
            * density_boost(matched_terms, chunk_token_count)
            * proximity_boost(chunk_token_count),
    )
}
