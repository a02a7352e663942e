//! Reciprocal Rank Fusion (RRF) over heterogeneous semantic/keyword result
//! lists, with a fixed keyword-match boost for the BM25 source.
//!
//! Based on: Cormack, Clarke, Buettcher (2009) — "Reciprocal Rank Fusion
//! outperforms Condorcet and individual Rank Learning Methods".

use std::collections::HashMap;

/// Tuning for [`reciprocal_rank_fusion`].
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// Controls how much weight lower ranks still carry. Higher `k` flattens
    /// the curve; the RRF paper's recommended default is 60.
    pub k: f64,
    /// Multiplier applied to a source list's contribution when its name is
    /// `"bm25"`, so an exact keyword match outweighs an equally-ranked dense
    /// hit.
    pub keyword_boost: f64,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: 60.0, keyword_boost: 1.2 }
    }
}

/// A document's fused standing across every source list it appeared in.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FusedScore {
    /// Sum of `boost / (k + rank)` across every source list containing this id.
    pub rrf_score: f64,
    /// Number of source lists this id appeared in.
    pub retrieval_count: usize,
    /// How many of those lists were dense/semantic (i.e. not `"bm25"`).
    pub semantic_count: usize,
    /// How many of those lists were the `"bm25"` keyword source.
    pub bm25_count: usize,
}

/// Fuses `sources` — named, already-ranked id lists (best first) — into one
/// descending ranking.
///
/// A source named `"bm25"` has its per-rank contribution multiplied by
/// `config.keyword_boost`. Ties are broken by insertion order of `sources`
/// then by id, which keeps the function deterministic for tests.
#[must_use]
pub fn reciprocal_rank_fusion(sources: &[(&str, &[String])], config: &RrfConfig) -> Vec<(String, FusedScore)> {
    let mut scores: HashMap<String, FusedScore> = HashMap::new();

    for (source_name, ids) in sources {
        let boost = if *source_name == "bm25" { config.keyword_boost } else { 1.0 };
        for (idx, id) in ids.iter().enumerate() {
            let rank = idx + 1;
            let rrf = boost / (config.k + rank as f64);
            let entry = scores.entry(id.clone()).or_default();
            entry.rrf_score += rrf;
            entry.retrieval_count += 1;
            if *source_name == "bm25" {
                entry.bm25_count += 1;
            } else {
                entry.semantic_count += 1;
            }
        }
    }

    let mut results: Vec<(String, FusedScore)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.rrf_score.total_cmp(&a.1.rrf_score).then_with(|| a.0.cmp(&b.0)));
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn single_source_orders_by_rank() {
        let list = ids(&["a", "b", "c"]);
        let fused = reciprocal_rank_fusion(&[("semantic", &list)], &RrfConfig::default());
        assert_eq!(fused[0].0, "a");
        assert!(fused[0].1.rrf_score > fused[1].1.rrf_score);
        assert!(fused[1].1.rrf_score > fused[2].1.rrf_score);
    }

    #[test]
    fn disjoint_sources_keep_every_id() {
        let l1 = ids(&["a", "b"]);
        let l2 = ids(&["c", "d"]);
        let fused = reciprocal_rank_fusion(&[("v1", &l1), ("v2", &l2)], &RrfConfig::default());
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn bm25_source_gets_keyword_boost() {
        let l1 = ids(&["a"]);
        let fused_semantic = reciprocal_rank_fusion(&[("v1", &l1)], &RrfConfig::default());
        let fused_bm25 = reciprocal_rank_fusion(&[("bm25", &l1)], &RrfConfig::default());
        assert!(fused_bm25[0].1.rrf_score > fused_semantic[0].1.rrf_score);
    }

    #[test]
    fn combined_score_sums_across_sources() {
        let l1 = ids(&["a"]);
        let l2 = ids(&["a"]);
        let fused = reciprocal_rank_fusion(&[("v1", &l1), ("v2", &l2)], &RrfConfig::default());
        let expected = 2.0 / 61.0;
        assert!((fused[0].1.rrf_score - expected).abs() < 1e-12);
        assert_eq!(fused[0].1.retrieval_count, 2);
        assert_eq!(fused[0].1.semantic_count, 2);
    }

    #[test]
    fn empty_sources_yield_empty_result() {
        let empty: Vec<String> = vec![];
        let fused = reciprocal_rank_fusion(&[("v1", &empty)], &RrfConfig::default());
        assert!(fused.is_empty());
    }

    #[test]
    fn retrieval_count_tracks_source_types() {
        let l1 = ids(&["a"]);
        let fused = reciprocal_rank_fusion(&[("v1", &l1), ("bm25", &l1)], &RrfConfig::default());
        assert_eq!(fused[0].1.retrieval_count, 2);
        assert_eq!(fused[0].1.semantic_count, 1);
        assert_eq!(fused[0].1.bm25_count, 1);
    }

    #[test]
    fn strictly_better_rank_in_every_source_never_scores_lower() {
        // "a" at rank 1 everywhere "b" is at rank 2 or worse must fuse >= "b".
        let l1 = ids(&["a", "b"]);
        let l2 = ids(&["a", "x", "b"]);
        let fused = reciprocal_rank_fusion(&[("v1", &l1), ("v2", &l2)], &RrfConfig::default());
        let score_of = |id: &str| fused.iter().find(|(k, _)| k == id).map(|(_, s)| s.rrf_score).unwrap_or(0.0);
        assert!(score_of("a") >= score_of("b"));
    }
}
