//! Ensemble reranking: combines dense-semantic, BM25, and cross-encoder
//! signals into one final relevance ranking.
//!
//! There is no standalone cross-encoder model in scope; the "cross-encoder"
//! signal is realized as an embedding cosine-similarity proxy between the
//! query and each candidate's content, computed through the same
//! [`Embedder`] used everywhere else. This keeps the ensemble's three
//! inputs independently meaningful without introducing a fourth external
//! model dependency.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::embedding::{Embedder, cosine_similarity};

/// Default weight on the dense-semantic signal.
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.55;
/// Default weight on the BM25 signal.
pub const DEFAULT_BM25_WEIGHT: f64 = 0.35;
/// Default weight on the cross-encoder-proxy signal.
pub const DEFAULT_CROSS_ENCODER_WEIGHT: f64 = 0.10;

/// A candidate awaiting ensemble scoring.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    /// The candidate chunk.
    pub chunk: Chunk,
    /// Dense-semantic similarity to the query, if available.
    pub semantic_score: Option<f32>,
    /// Raw BM25 score, if available (normalized against the batch max
    /// before combining, since it is unbounded unlike the other signals).
    pub bm25_score: Option<f64>,
}

/// One ranked result after ensemble scoring.
#[derive(Debug, Clone)]
pub struct RerankResult {
    /// The scored chunk.
    pub chunk: Chunk,
    /// The final weighted ensemble score.
    pub ensemble_score: f64,
    /// The semantic component contributed to the ensemble.
    pub semantic_score: f64,
    /// The batch-normalized BM25 component contributed to the ensemble.
    pub bm25_score: f64,
    /// The cross-encoder-proxy component contributed to the ensemble.
    pub cross_encoder_score: f64,
    /// 1-based rank within the returned result set.
    pub rank: usize,
}

/// Combines semantic, BM25, and cross-encoder-proxy scores into one
/// ranking. Weights are normalized to sum to 1.0 at construction.
pub struct Reranker {
    semantic_weight: f64,
    bm25_weight: f64,
    cross_encoder_weight: f64,
    use_cross_encoder: bool,
    embedder: Option<Arc<dyn Embedder>>,
}

impl Reranker {
    /// Creates a reranker with the given weights. `embedder` is required
    /// when `use_cross_encoder` is true; it's ignored otherwise.
    #[must_use]
    pub fn new(
        semantic_weight: f64,
        bm25_weight: f64,
        cross_encoder_weight: f64,
        use_cross_encoder: bool,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let total = semantic_weight + bm25_weight + cross_encoder_weight;
        let total = if total > 0.0 { total } else { 1.0 };
        Self {
            semantic_weight: semantic_weight / total,
            bm25_weight: bm25_weight / total,
            cross_encoder_weight: cross_encoder_weight / total,
            use_cross_encoder,
            embedder,
        }
    }

    /// Creates a reranker with the default weight split (0.55/0.35/0.10)
    /// and the cross-encoder proxy enabled.
    #[must_use]
    pub fn with_defaults(embedder: Arc<dyn Embedder>) -> Self {
        Self::new(
            DEFAULT_SEMANTIC_WEIGHT,
            DEFAULT_BM25_WEIGHT,
            DEFAULT_CROSS_ENCODER_WEIGHT,
            true,
            Some(embedder),
        )
    }

    /// Scores `query` against the first 500 characters of `text` using the
    /// cross-encoder-proxy embedder, mapping cosine similarity from
    /// `[-1, 1]` to `[0, 1]` so it combines linearly with the other two
    /// already-unit-range signals.
    fn score_pair(&self, query: &str, text: &str) -> f64 {
        if !self.use_cross_encoder {
            return 0.5;
        }
        let Some(embedder) = &self.embedder else {
            return 0.5;
        };
        let truncated: String = text.chars().take(500).collect();
        let (Ok(query_vec), Ok(text_vec)) = (embedder.embed(query), embedder.embed(&truncated)) else {
            return 0.5;
        };
        let cosine = f64::from(cosine_similarity(&query_vec, &text_vec));
        ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
    }

    /// Scores and ranks `candidates` against `query`, returning at most
    /// `top_k` results sorted by descending ensemble score.
    #[must_use]
    pub fn rerank(&self, query: &str, candidates: Vec<RerankCandidate>, top_k: usize) -> Vec<RerankResult> {
        let max_bm25 = candidates
            .iter()
            .filter_map(|c| c.bm25_score)
            .fold(0.0f64, f64::max)
            .max(1e-9);

        let mut scored: Vec<RerankResult> = candidates
            .into_iter()
            .map(|candidate| {
                let semantic = f64::from(candidate.semantic_score.unwrap_or(0.0));
                let bm25_normalized = candidate.bm25_score.map_or(0.0, |s| s / max_bm25);
                let cross_encoder = self.score_pair(query, &candidate.chunk.content);

                let ensemble_score = self.semantic_weight * semantic
                    + self.bm25_weight * bm25_normalized
                    + self.cross_encoder_weight * cross_encoder;

                RerankResult {
                    chunk: candidate.chunk,
                    ensemble_score,
                    semantic_score: semantic,
                    bm25_score: bm25_normalized,
                    cross_encoder_score: cross_encoder,
                    rank: 0,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.ensemble_score.total_cmp(&a.ensemble_score));
        scored.truncate(top_k);
        for (idx, result) in scored.iter_mut().enumerate() {
            result.rank = idx + 1;
        }
        scored
    }
}
