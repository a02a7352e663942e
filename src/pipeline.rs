//! Orchestrates the nine-stage hierarchical hybrid retrieval dataflow.
//!
//! Stage numbers in the comments below are the ones from the design doc
//! this crate implements, so behavior can be checked stage-by-stage: cache
//! check, query understanding, context configuration, exact-code routing,
//! parent retrieval, cross-tier child retrieval, keyword augmentation,
//! reciprocal rank fusion, ensemble reranking, context assembly.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::bm25::{Bm25Filter, Bm25Index};
use crate::cache::{CacheStats, SemanticCache};
use crate::chunk::{Chunk, ChunkTier, ChunkType};
use crate::context_config::{ContextConfig, get_context_config};
use crate::embedding::Embedder;
use crate::fusion::{FusedScore, RrfConfig, reciprocal_rank_fusion};
use crate::query_enhancer::{Intent, QueryDescriptor, QueryEnhancer};
use crate::reranker::{RerankCandidate, Reranker};
use crate::error::Result;
use crate::vector_store::{VectorFilter, VectorHit, VectorStore};

/// A chunk's content is truncated once it exceeds this many whitespace-
/// separated words — a safety net, not the primary context-sizing control
/// (that's `ContextConfig`).
const TRUNCATION_WORD_LIMIT: usize = 1200;
/// Words kept from each end of an oversized chunk.
const TRUNCATION_KEEP: usize = 600;
const ELISION_MARKER: &str = "[...]";
/// Pre-filter hits kept when cross-tier filtering eliminates every candidate.
const CROSS_TIER_FALLBACK_DEFAULT: usize = 5;

/// Tunables for [`RetrievalPipeline::retrieve`].
#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    /// How many parent (procedure-overview) chunks Stage 3 retrieves.
    pub top_k_parent: usize,
    /// How many child chunks Stage 4/5 retrieve per source.
    pub top_k_child: usize,
    /// Whether the classified intent's `ContextConfig.chunks` overrides the
    /// final candidate count (spec default: true). When `false`,
    /// `top_k_final` is used as the procedure cap instead.
    pub enable_intent_based: bool,
    /// Caller-supplied cap on the number of top-ranked procedures to
    /// assemble context from, used in place of the intent's own `chunks`
    /// value when `enable_intent_based` is `false`.
    pub top_k_final: usize,
    /// Reciprocal rank fusion tuning (k parameter, keyword boost).
    pub rrf: RrfConfig,
    /// Pre-filter hits kept per variation when cross-tier filtering would
    /// otherwise eliminate every candidate.
    pub cross_tier_fallback: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_parent: 5,
            top_k_child: 100,
            enable_intent_based: true,
            top_k_final: 5,
            rrf: RrfConfig::default(),
            cross_tier_fallback: CROSS_TIER_FALLBACK_DEFAULT,
        }
    }
}

/// One chunk in a [`RetrievalResult`], carrying every score the pipeline
/// computed for it along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// The chunk's stable id.
    pub chunk_id: String,
    /// The procedure this chunk belongs to, if known.
    pub procedure_id: Option<String>,
    /// Parent or child tier.
    pub chunk_tier: ChunkTier,
    /// The chunk's facet, `None` for parent chunks.
    pub chunk_type: Option<ChunkType>,
    /// The (possibly truncated) text content, as it appears in `context`.
    pub content: String,
    /// Dense-semantic similarity to the query, `0.0` if this chunk was
    /// never matched by vector search (e.g. a pure BM25 hit).
    pub score: f32,
    /// Raw BM25 score, if this chunk was also a keyword hit.
    pub bm25_score: Option<f64>,
    /// Reciprocal-rank-fusion score across every contributing source.
    pub rrf_score: Option<f64>,
    /// Final ensemble/fallback score used to rank and select this chunk.
    pub final_score: Option<f64>,
    /// Whether this chunk survived Stage 4's cross-tier filter (`false` for
    /// the fallback "keep the top five anyway" path, and for exact-code
    /// routing where cross-tier filtering does not apply).
    pub cross_tier_match: bool,
}

/// Bookkeeping about how a [`RetrievalResult`] was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalMetadata {
    /// Number of parent chunks considered (Stage 3, or exact-code parents).
    pub parent_count: usize,
    /// Number of child chunks in the final result.
    pub child_count: usize,
    /// How many final chunks carry a dense-semantic contribution.
    pub semantic_count: usize,
    /// How many final chunks carry a BM25 contribution.
    pub bm25_count: usize,
    /// The query variations the enhancer generated.
    pub variations: Vec<String>,
    /// `"hybrid"` or `"exact_code_match"`.
    pub search_type: String,
}

/// The pipeline's output: an ordered, scored chunk set plus the assembled
/// context text ready for a downstream answer generator.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// The question exactly as the caller supplied it.
    pub query: String,
    /// The classified intent.
    pub intent: Intent,
    /// Selected chunks, in assembly order (procedures, then siblings).
    pub retrieved_chunks: Vec<RetrievedChunk>,
    /// The assembled context text.
    pub context: String,
    /// Confidence in `[0.0, 1.0]`; `0.0` iff no chunks were selected.
    pub confidence: f64,
    /// Diagnostic counts and the search type that produced this result.
    pub metadata: RetrievalMetadata,
}

struct RankedChunk {
    chunk: Chunk,
    semantic_score: f32,
    bm25_score: Option<f64>,
    rrf_score: f64,
    final_score: f64,
    cross_tier_match: bool,
}

fn to_retrieved_chunk(rc: &RankedChunk) -> RetrievedChunk {
    RetrievedChunk {
        chunk_id: rc.chunk.id.clone(),
        procedure_id: rc.chunk.procedure_code().map(str::to_string),
        chunk_tier: rc.chunk.metadata.tier,
        chunk_type: rc.chunk.metadata.chunk_type,
        content: rc.chunk.content.clone(),
        score: rc.semantic_score,
        bm25_score: rc.bm25_score,
        rrf_score: Some(rc.rrf_score),
        final_score: Some(rc.final_score),
        cross_tier_match: rc.cross_tier_match,
    }
}

/// Truncates oversized content to its first and last `TRUNCATION_KEEP`
/// words, joined by an elision marker. A last-resort safety net: the
/// primary context-sizing control is `ContextConfig`, not this.
fn truncate_content(chunk_id: &str, content: &str) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.len() <= TRUNCATION_WORD_LIMIT {
        return content.to_string();
    }
    tracing::warn!(chunk_id, word_count = words.len(), "truncating oversized chunk content");
    let head = words[..TRUNCATION_KEEP].join(" ");
    let tail = words[words.len() - TRUNCATION_KEEP..].join(" ");
    format!("{head} {ELISION_MARKER} {tail}")
}

/// Orchestrates Stages 0–8 of the hybrid retrieval dataflow over its
/// collaborators. Cheap to share across threads behind an `Arc`: every
/// collaborator is itself `Send + Sync`, and `retrieve` takes `&self`.
pub struct RetrievalPipeline {
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    query_enhancer: QueryEnhancer,
    bm25: Option<Bm25Index>,
    bm25_chunks: Vec<Chunk>,
    reranker: Option<Reranker>,
    cache: Option<SemanticCache<RetrievalResult>>,
    config: RetrievalConfig,
}

impl RetrievalPipeline {
    /// Creates a new pipeline. `bm25`/`bm25_chunks` are required together
    /// (Stage 5 is skipped entirely when `bm25` is `None`); `reranker` and
    /// `cache` are each independently optional (Stage 7 falls back to a
    /// simple weighted fusion without a reranker; Stage 0/§4.9.2 are no-ops
    /// without a cache).
    #[must_use]
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        query_enhancer: QueryEnhancer,
        bm25: Option<Bm25Index>,
        bm25_chunks: Vec<Chunk>,
        reranker: Option<Reranker>,
        cache: Option<SemanticCache<RetrievalResult>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            vector_store,
            embedder,
            query_enhancer,
            bm25,
            bm25_chunks,
            reranker,
            cache,
            config,
        }
    }

    /// Returns a snapshot of the semantic cache's statistics, or `None` if
    /// no cache is configured.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().and_then(|c| c.stats().ok())
    }

    /// Runs the full retrieval dataflow for `question`.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedder or vector store fails; the pipeline
    /// never retries. Query-enhancer and cache failures are absorbed
    /// internally per the fallback contracts of their own modules.
    pub fn retrieve(&self, question: &str) -> Result<RetrievalResult> {
        // Stage 0: cache check.
        let query_embedding = self.embedder.embed(question)?;
        if let Some(cache) = &self.cache {
            match cache.get(question, &query_embedding) {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "semantic cache get failed, proceeding without cache");
                }
            }
        }

        // Stage 1: query understanding.
        let descriptor = self.query_enhancer.enhance_query(question);

        // Stage 1.5: context configuration. `top_k_final` overrides the
        // intent's own procedure cap when intent-based sizing is disabled.
        let context_config = get_context_config(descriptor.intent);
        let context_config = if self.config.enable_intent_based {
            context_config
        } else {
            ContextConfig { chunks: self.config.top_k_final.max(1), ..context_config }
        };

        // Stage 2: exact-code routing.
        if let Some(code) = descriptor.exact_code.clone() {
            if let Some((context, confidence, retrieved_chunks, metadata)) =
                self.exact_code_route(&descriptor, context_config, &code)?
            {
                let result = RetrievalResult {
                    query: question.to_string(),
                    intent: descriptor.intent,
                    retrieved_chunks,
                    context,
                    confidence,
                    metadata,
                };
                self.store_in_cache(question, query_embedding, &result);
                return Ok(result);
            }
        }

        // Stage 3: parent retrieval.
        let parent_filter = VectorFilter {
            tier: Some(ChunkTier::Parent),
            ..Default::default()
        };
        let parent_hits = self.vector_store.search(&query_embedding, self.config.top_k_parent, &parent_filter)?;
        let parent_procedure_ids: HashSet<String> =
            parent_hits.iter().filter_map(|h| h.chunk.procedure_code().map(str::to_string)).collect();

        // Stage 4: child retrieval with cross-tier filtering, per variation.
        let mut chunk_pool: HashMap<String, Chunk> = HashMap::new();
        let mut semantic_scores: HashMap<String, f32> = HashMap::new();
        let mut cross_tier: HashSet<String> = HashSet::new();
        let mut source_lists: Vec<(String, Vec<String>)> = Vec::new();

        for variation in &descriptor.query_variations {
            let var_embedding = self.embedder.embed(variation)?;
            let strict_filter = VectorFilter {
                tier: Some(ChunkTier::Child),
                chunk_types: descriptor.chunk_type_filter.clone(),
                ..Default::default()
            };
            let mut hits = self.vector_store.search(&var_embedding, self.config.top_k_child, &strict_filter)?;
            if hits.is_empty() && descriptor.chunk_type_filter.is_some() {
                let loose_filter = VectorFilter {
                    tier: Some(ChunkTier::Child),
                    ..Default::default()
                };
                hits = self.vector_store.search(&var_embedding, self.config.top_k_child, &loose_filter)?;
            }

            let cross_tier_hits: Vec<VectorHit> = hits
                .iter()
                .filter(|h| h.chunk.procedure_code().is_some_and(|p| parent_procedure_ids.contains(p)))
                .cloned()
                .collect();

            let kept: Vec<VectorHit> = if cross_tier_hits.is_empty() && !hits.is_empty() {
                hits.into_iter().take(self.config.cross_tier_fallback).collect()
            } else {
                for hit in &cross_tier_hits {
                    cross_tier.insert(hit.chunk.id.clone());
                }
                cross_tier_hits
            };

            let mut ordered = Vec::with_capacity(kept.len());
            for hit in &kept {
                chunk_pool.entry(hit.chunk.id.clone()).or_insert_with(|| hit.chunk.clone());
                semantic_scores
                    .entry(hit.chunk.id.clone())
                    .and_modify(|s| *s = s.max(hit.similarity))
                    .or_insert(hit.similarity);
                ordered.push(hit.chunk.id.clone());
            }
            source_lists.push((variation.clone(), ordered));
        }

        // Stage 5: keyword augmentation.
        let mut bm25_scores: HashMap<String, f64> = HashMap::new();
        if let Some(bm25) = &self.bm25 {
            let bm25_filter = Bm25Filter {
                tier: Some(ChunkTier::Child),
                chunk_types: descriptor.chunk_type_filter.clone(),
            };
            let hits = bm25.search(question, self.config.top_k_child, &bm25_filter, &self.bm25_chunks)?;
            let mut ordered = Vec::with_capacity(hits.len());
            for hit in &hits {
                bm25_scores.insert(hit.chunk_id.clone(), hit.score);
                if !chunk_pool.contains_key(&hit.chunk_id) {
                    if let Some(chunk) = self.bm25_chunks.iter().find(|c| c.id == hit.chunk_id) {
                        chunk_pool.insert(hit.chunk_id.clone(), chunk.clone());
                    }
                }
                ordered.push(hit.chunk_id.clone());
            }
            source_lists.push(("bm25".to_string(), ordered));
        }

        // Stage 6: reciprocal rank fusion.
        let sources: Vec<(&str, &[String])> = source_lists.iter().map(|(k, v)| (k.as_str(), v.as_slice())).collect();
        let fused = reciprocal_rank_fusion(&sources, &self.config.rrf);

        // Stage 7: ensemble reranking (or simple weighted-fusion fallback).
        let rerank_cap = context_config
            .chunks
            .saturating_mul(context_config.max_descendants)
            .saturating_add(context_config.max_siblings)
            .max(1);
        let ranked = self.rerank_or_fallback(question, &fused, &chunk_pool, &semantic_scores, &bm25_scores, rerank_cap, &cross_tier);

        // Stage 8: context assembly.
        let (context, confidence, retrieved_chunks, mut metadata) =
            self.assemble_context(&descriptor, context_config, &parent_hits, ranked);
        metadata.search_type = "hybrid".to_string();

        let result = RetrievalResult {
            query: question.to_string(),
            intent: descriptor.intent,
            retrieved_chunks,
            context,
            confidence,
            metadata,
        };
        self.store_in_cache(question, query_embedding, &result);
        Ok(result)
    }

    fn store_in_cache(&self, question: &str, embedding: Vec<f32>, result: &RetrievalResult) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.put(question, embedding, result.clone()) {
                tracing::warn!(error = %err, "semantic cache put failed");
            }
        }
    }

    /// Stage 2. Bypasses hybrid search when an exact procedure code was
    /// recognized, honoring the intent's `chunk_type` filter and
    /// `include_parents` flag. Returns `Ok(None)` to fall through to
    /// hybrid search when the procedure has no matching chunks.
    fn exact_code_route(
        &self,
        descriptor: &QueryDescriptor,
        context_config: ContextConfig,
        code: &str,
    ) -> Result<Option<(String, f64, Vec<RetrievedChunk>, RetrievalMetadata)>> {
        let parents = if context_config.include_parents {
            self.vector_store.search_by_code(
                code,
                &VectorFilter {
                    tier: Some(ChunkTier::Parent),
                    ..Default::default()
                },
            )?
        } else {
            Vec::new()
        };

        let mut children = self.vector_store.search_by_code(
            code,
            &VectorFilter {
                tier: Some(ChunkTier::Child),
                chunk_types: descriptor.chunk_type_filter.clone(),
                ..Default::default()
            },
        )?;
        children.sort_by(|a, b| a.id.cmp(&b.id));

        if parents.is_empty() && children.is_empty() {
            return Ok(None);
        }

        let mut context = String::new();
        let mut retrieved_chunks = Vec::with_capacity(parents.len() + children.len());

        if let Some(parent) = parents.first() {
            let name = parent.metadata.procedure_name.as_deref().unwrap_or("(unknown procedure)");
            let _ = writeln!(context, "## {name} ({code}) — overview");
            let _ = writeln!(context, "{}", truncate_content(&parent.id, &parent.content));
            let _ = writeln!(context);
            retrieved_chunks.push(RetrievedChunk {
                chunk_id: parent.id.clone(),
                procedure_id: parent.procedure_code().map(str::to_string),
                chunk_tier: parent.metadata.tier,
                chunk_type: None,
                content: parent.content.clone(),
                score: 1.0,
                bm25_score: None,
                rrf_score: None,
                final_score: Some(1.0),
                cross_tier_match: false,
            });
        }

        for child in &children {
            let section = child.metadata.chunk_type.map_or("section", ChunkType::wire_name);
            let _ = writeln!(context, "## {code} — {section}");
            let _ = writeln!(context, "{}", truncate_content(&child.id, &child.content));
            let _ = writeln!(context);
            retrieved_chunks.push(RetrievedChunk {
                chunk_id: child.id.clone(),
                procedure_id: child.procedure_code().map(str::to_string),
                chunk_tier: child.metadata.tier,
                chunk_type: child.metadata.chunk_type,
                content: child.content.clone(),
                score: 1.0,
                bm25_score: None,
                rrf_score: None,
                final_score: Some(1.0),
                cross_tier_match: false,
            });
        }

        let metadata = RetrievalMetadata {
            parent_count: usize::from(!parents.is_empty()),
            child_count: children.len(),
            semantic_count: 0,
            bm25_count: 0,
            variations: descriptor.query_variations.clone(),
            search_type: "exact_code_match".to_string(),
        };

        Ok(Some((context, 1.0, retrieved_chunks, metadata)))
    }

    /// Stage 7. Scores the fused candidate pool with the configured
    /// reranker, or — when none is configured — a simple weighted
    /// combination of RRF and semantic score.
    fn rerank_or_fallback(
        &self,
        query: &str,
        fused: &[(String, FusedScore)],
        chunk_pool: &HashMap<String, Chunk>,
        semantic_scores: &HashMap<String, f32>,
        bm25_scores: &HashMap<String, f64>,
        top_k: usize,
        cross_tier: &HashSet<String>,
    ) -> Vec<RankedChunk> {
        if let Some(reranker) = &self.reranker {
            let candidates: Vec<RerankCandidate> = fused
                .iter()
                .filter_map(|(id, _)| {
                    chunk_pool.get(id).map(|chunk| RerankCandidate {
                        chunk: chunk.clone(),
                        semantic_score: semantic_scores.get(id).copied(),
                        bm25_score: bm25_scores.get(id).copied(),
                    })
                })
                .collect();

            let results = reranker.rerank(query, candidates, top_k);
            let rrf_by_id: HashMap<&str, f64> = fused.iter().map(|(id, s)| (id.as_str(), s.rrf_score)).collect();

            results
                .into_iter()
                .map(|r| RankedChunk {
                    cross_tier_match: cross_tier.contains(&r.chunk.id),
                    semantic_score: semantic_scores.get(&r.chunk.id).copied().unwrap_or(0.0),
                    bm25_score: bm25_scores.get(&r.chunk.id).copied(),
                    rrf_score: rrf_by_id.get(r.chunk.id.as_str()).copied().unwrap_or(0.0),
                    final_score: r.ensemble_score,
                    chunk: r.chunk,
                })
                .collect()
        } else {
            let mut ranked: Vec<RankedChunk> = fused
                .iter()
                .filter_map(|(id, fused_score)| {
                    chunk_pool.get(id).map(|chunk| {
                        let semantic = semantic_scores.get(id).copied().unwrap_or(0.0);
                        let final_score = 0.6 * fused_score.rrf_score + 0.4 * f64::from(semantic);
                        RankedChunk {
                            chunk: chunk.clone(),
                            semantic_score: semantic,
                            bm25_score: bm25_scores.get(id).copied(),
                            rrf_score: fused_score.rrf_score,
                            final_score,
                            cross_tier_match: cross_tier.contains(id),
                        }
                    })
                })
                .collect();
            ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
            ranked.truncate(top_k);
            ranked
        }
    }

    /// Stage 8. Groups post-rerank candidates by procedure, selects the
    /// top `context_config.chunks` procedures, emits a context block per
    /// procedure (parent content first, then its top `max_descendants`
    /// children), then injects up to `max_siblings` related chunks from the
    /// remaining procedures.
    fn assemble_context(
        &self,
        descriptor: &QueryDescriptor,
        context_config: ContextConfig,
        parent_hits: &[VectorHit],
        ranked: Vec<RankedChunk>,
    ) -> (String, f64, Vec<RetrievedChunk>, RetrievalMetadata) {
        let parent_lookup: HashMap<String, Chunk> =
            parent_hits.iter().map(|h| (h.chunk.id.clone(), h.chunk.clone())).collect();

        let mut groups: HashMap<String, Vec<RankedChunk>> = HashMap::new();
        for rc in ranked {
            let procedure_id = rc.chunk.procedure_code().unwrap_or_default().to_string();
            groups.entry(procedure_id).or_default().push(rc);
        }

        let mut group_order: Vec<(String, f64)> = groups
            .iter()
            .map(|(pid, v)| (pid.clone(), v.iter().map(|rc| rc.final_score).fold(f64::MIN, f64::max)))
            .collect();
        group_order.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let top_n = context_config.chunks.min(group_order.len());
        let (selected, rest) = group_order.split_at(top_n);

        let mut context = String::new();
        let mut retrieved_chunks = Vec::new();
        let mut score_sum = 0.0_f64;
        let mut score_count = 0_usize;

        for (procedure_id, _) in selected {
            let Some(mut children) = groups.remove(procedure_id) else { continue };
            children.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
            children.truncate(context_config.max_descendants);

            let parent = if context_config.include_parents {
                children
                    .first()
                    .and_then(|c| c.chunk.metadata.parent_chunk_id.as_ref())
                    .and_then(|parent_id| parent_lookup.get(parent_id))
                    .or_else(|| parent_lookup.values().find(|p| p.procedure_code() == Some(procedure_id.as_str())))
            } else {
                None
            };

            for (idx, rc) in children.iter().enumerate() {
                if let Some(breadcrumb) = &rc.chunk.metadata.breadcrumb {
                    let _ = writeln!(context, "## {breadcrumb} [relevance {:.3}]", rc.final_score);
                } else {
                    let name = rc.chunk.metadata.procedure_name.as_deref().unwrap_or("(unknown procedure)");
                    let code = rc.chunk.procedure_code().unwrap_or("?");
                    let domain = rc.chunk.metadata.domain.as_deref().unwrap_or("(unknown domain)");
                    let chunk_type = rc.chunk.metadata.chunk_type.map_or("overview", ChunkType::wire_name);
                    let _ = writeln!(
                        context,
                        "## {name} ({code}) — {domain} / {chunk_type} [relevance {:.3}]",
                        rc.final_score
                    );
                }
                if idx == 0 {
                    if let Some(context_text) = &rc.chunk.metadata.parent_context {
                        let _ = writeln!(context, "{context_text}");
                        let _ = writeln!(context);
                    } else if let Some(parent) = parent {
                        let _ = writeln!(context, "{}", truncate_content(&parent.id, &parent.content));
                        let _ = writeln!(context);
                    }
                }
                let _ = writeln!(context, "{}", truncate_content(&rc.chunk.id, &rc.chunk.content));
                let _ = writeln!(context);

                score_sum += rc.final_score;
                score_count += 1;
                retrieved_chunks.push(to_retrieved_chunk(rc));
            }
        }

        let mut sibling_count = 0;
        for (procedure_id, _) in rest {
            if sibling_count >= context_config.max_siblings {
                break;
            }
            let Some(mut children) = groups.remove(procedure_id) else { continue };
            children.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
            let Some(best) = children.into_iter().next() else { continue };

            let name = best.chunk.metadata.procedure_name.as_deref().unwrap_or("(unknown procedure)");
            let _ = writeln!(context, "### Related: {name} [relevance {:.3}]", best.final_score);
            let _ = writeln!(context, "{}", truncate_content(&best.chunk.id, &best.chunk.content));
            let _ = writeln!(context);

            retrieved_chunks.push(to_retrieved_chunk(&best));
            sibling_count += 1;
        }

        let confidence = if score_count > 0 { (score_sum / score_count as f64 * 2.0).clamp(0.0, 1.0) } else { 0.0 };

        let metadata = RetrievalMetadata {
            parent_count: parent_hits.len(),
            child_count: retrieved_chunks.len(),
            semantic_count: retrieved_chunks.iter().filter(|c| c.score > 0.0).count(),
            bm25_count: retrieved_chunks.iter().filter(|c| c.bm25_score.is_some()).count(),
            variations: descriptor.query_variations.clone(),
            search_type: String::new(),
        };

        (context, confidence, retrieved_chunks, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadata;
    use crate::embedding::FallbackEmbedder;
    use crate::llm::NullLlmClient;
    use crate::vector_store::InMemoryVectorStore;
    use std::time::Duration;

    const DIMS: usize = 64;

    fn chunk(id: &str, content: &str, meta: ChunkMetadata) -> Chunk {
        Chunk::new(id, content, meta)
    }

    fn meta(
        tier: ChunkTier,
        chunk_type: Option<ChunkType>,
        procedure_code: &str,
        name: &str,
        parent_id: Option<&str>,
    ) -> ChunkMetadata {
        ChunkMetadata {
            procedure_code: Some(procedure_code.to_string()),
            procedure_name: Some(name.to_string()),
            domain: Some("Tư pháp".to_string()),
            tier,
            chunk_type,
            parent_chunk_id: parent_id.map(str::to_string),
            extra: HashMap::new(),
            breadcrumb: None,
            parent_context: None,
            sibling_chunk_ids: Vec::new(),
            related_procedure_ids: Vec::new(),
            importance_score: None,
            complexity_level: None,
        }
    }

    fn sample_corpus() -> Vec<Chunk> {
        vec![
            chunk(
                "1.001234_parent",
                "tổng quan thủ tục đăng ký khai sinh cho trẻ em mới sinh",
                meta(ChunkTier::Parent, None, "1.001234", "Đăng ký khai sinh", None),
            ),
            chunk(
                "1.001234_documents",
                "hồ sơ cần những giấy tờ gì gồm giấy chứng sinh chứng minh nhân dân sổ hộ khẩu của cha mẹ",
                meta(
                    ChunkTier::Child,
                    Some(ChunkType::Documents),
                    "1.001234",
                    "Đăng ký khai sinh",
                    Some("1.001234_parent"),
                ),
            ),
            chunk(
                "1.001234_process",
                "quy trình các bước thực hiện nộp hồ sơ tại ủy ban nhân dân xã phường nơi cư trú",
                meta(
                    ChunkTier::Child,
                    Some(ChunkType::Process),
                    "1.001234",
                    "Đăng ký khai sinh",
                    Some("1.001234_parent"),
                ),
            ),
            chunk(
                "1.001234_fees",
                "thời gian giải quyết trong vòng một ngày làm việc lệ phí miễn phí cho khai sinh lần đầu",
                meta(
                    ChunkTier::Child,
                    Some(ChunkType::FeesTiming),
                    "1.001234",
                    "Đăng ký khai sinh",
                    Some("1.001234_parent"),
                ),
            ),
            chunk(
                "1.005678_parent",
                "tổng quan thủ tục đăng ký kết hôn cho công dân việt nam",
                meta(ChunkTier::Parent, None, "1.005678", "Đăng ký kết hôn", None),
            ),
            chunk(
                "1.005678_documents",
                "hồ sơ đăng ký kết hôn cần tờ khai đăng ký kết hôn giấy xác nhận tình trạng hôn nhân",
                meta(
                    ChunkTier::Child,
                    Some(ChunkType::Documents),
                    "1.005678",
                    "Đăng ký kết hôn",
                    Some("1.005678_parent"),
                ),
            ),
            chunk(
                "1.005678_fees",
                "thời gian giải quyết đăng ký kết hôn trong ngày lệ phí theo quy định địa phương",
                meta(
                    ChunkTier::Child,
                    Some(ChunkType::FeesTiming),
                    "1.005678",
                    "Đăng ký kết hôn",
                    Some("1.005678_parent"),
                ),
            ),
        ]
    }

    fn build_pipeline(with_bm25: bool, with_reranker: bool, with_cache: bool) -> RetrievalPipeline {
        let chunks = sample_corpus();
        let embedder: Arc<dyn Embedder> = Arc::new(FallbackEmbedder::new(DIMS));
        let store = InMemoryVectorStore::new(DIMS);
        for c in &chunks {
            let embedding = embedder.embed(&c.content).unwrap();
            store.upsert(c.clone(), embedding).unwrap();
        }

        let bm25 = with_bm25.then(|| {
            let mut index = Bm25Index::default();
            index.build_index(&chunks).unwrap();
            index
        });

        let reranker = with_reranker.then(|| Reranker::with_defaults(Arc::clone(&embedder)));
        let cache = with_cache.then(|| SemanticCache::new(10, Duration::from_secs(3600), 0.92));

        RetrievalPipeline::new(
            Arc::new(store),
            embedder,
            QueryEnhancer::new(Arc::new(NullLlmClient)),
            bm25,
            chunks,
            reranker,
            cache,
            RetrievalConfig::default(),
        )
    }

    #[test]
    fn hybrid_retrieve_returns_bounded_nonempty_result() {
        let pipeline = build_pipeline(true, true, false);
        let result = pipeline.retrieve("hồ sơ đăng ký khai sinh cần những giấy tờ gì").unwrap();

        assert!(!result.retrieved_chunks.is_empty());
        assert!((0.0..=1.0).contains(&result.confidence));
        let config = get_context_config(result.intent);
        let cap = config.chunks * config.max_descendants + config.max_siblings;
        assert!(result.retrieved_chunks.len() <= cap);
        assert_eq!(result.metadata.search_type, "hybrid");
    }

    #[test]
    fn exact_code_routing_yields_full_confidence_and_tagged_search_type() {
        let pipeline = build_pipeline(true, true, false);
        let result = pipeline.retrieve("thủ tục 1.001234 cần giấy tờ gì").unwrap();

        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.metadata.search_type, "exact_code_match");
        assert!(result.retrieved_chunks.iter().all(|c| c.procedure_id.as_deref() == Some("1.001234")));
    }

    #[test]
    fn timeline_intent_restricts_chunk_type_to_process_and_fees() {
        let pipeline = build_pipeline(true, true, false);
        let result = pipeline.retrieve("thời gian giải quyết thủ tục đăng ký khai sinh").unwrap();

        assert_eq!(result.intent, Intent::Timeline);
        for rc in &result.retrieved_chunks {
            assert!(matches!(rc.chunk_type, Some(ChunkType::Process) | Some(ChunkType::FeesTiming)));
        }
    }

    #[test]
    fn bm25_absent_is_non_fatal() {
        let pipeline = build_pipeline(false, true, false);
        let result = pipeline.retrieve("hồ sơ đăng ký khai sinh cần những giấy tờ gì").unwrap();
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn reranker_absent_falls_back_to_weighted_fusion() {
        let pipeline = build_pipeline(true, false, false);
        let result = pipeline.retrieve("hồ sơ đăng ký khai sinh cần những giấy tờ gì").unwrap();
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn unknown_intent_falls_back_to_overview_without_error() {
        let pipeline = build_pipeline(true, true, false);
        let result = pipeline.retrieve("xin chào").unwrap();
        assert_eq!(result.intent, Intent::Overview);
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn repeat_query_hits_cache_and_returns_identical_result() {
        let pipeline = build_pipeline(true, true, true);
        let question = "hồ sơ đăng ký khai sinh cần những giấy tờ gì";

        let first = pipeline.retrieve(question).unwrap();
        let second = pipeline.retrieve(question).unwrap();

        assert_eq!(first, second);
        let stats = pipeline.cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_queries, 2);
    }

    #[test]
    fn cache_disabled_means_no_stats() {
        let pipeline = build_pipeline(true, true, false);
        assert!(pipeline.cache_stats().is_none());
    }

    #[test]
    fn confidence_is_clamped_to_zero_when_average_final_score_is_negative() {
        let pipeline = build_pipeline(true, true, false);
        let descriptor = pipeline.query_enhancer.enhance_query("hồ sơ đăng ký khai sinh cần những giấy tờ gì");
        let context_config = get_context_config(descriptor.intent);

        let negative_chunk = RankedChunk {
            chunk: chunk(
                "1.001234_documents",
                "hồ sơ cần những giấy tờ gì",
                meta(ChunkTier::Child, Some(ChunkType::Documents), "1.001234", "Đăng ký khai sinh", Some("1.001234_parent")),
            ),
            semantic_score: -0.8,
            bm25_score: None,
            rrf_score: 0.01,
            final_score: -0.6,
            cross_tier_match: false,
        };

        let (_, confidence, _, _) = pipeline.assemble_context(&descriptor, context_config, &[], vec![negative_chunk]);
        assert!((0.0..=1.0).contains(&confidence));
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn disabling_intent_based_sizing_honors_caller_supplied_top_k_final() {
        let chunks = sample_corpus();
        let embedder: Arc<dyn Embedder> = Arc::new(FallbackEmbedder::new(DIMS));
        let store = InMemoryVectorStore::new(DIMS);
        for c in &chunks {
            let embedding = embedder.embed(&c.content).unwrap();
            store.upsert(c.clone(), embedding).unwrap();
        }
        let mut bm25 = Bm25Index::default();
        bm25.build_index(&chunks).unwrap();
        let reranker = Reranker::with_defaults(Arc::clone(&embedder));

        let config = RetrievalConfig {
            enable_intent_based: false,
            top_k_final: 1,
            ..RetrievalConfig::default()
        };

        let pipeline = RetrievalPipeline::new(
            Arc::new(store),
            embedder,
            QueryEnhancer::new(Arc::new(NullLlmClient)),
            Some(bm25),
            chunks,
            Some(reranker),
            None,
            config,
        );

        let question = "hồ sơ đăng ký khai sinh cần những giấy tờ gì và kết hôn cần gì";
        let result = pipeline.retrieve(question).unwrap();

        // With `enable_intent_based` off, the procedure cap forwarded to
        // assembly is `top_k_final`, not the intent's own `chunks` value.
        let base = get_context_config(result.intent);
        let cap = config.top_k_final * base.max_descendants + base.max_siblings;
        assert!(result.retrieved_chunks.len() <= cap, "{} exceeds cap {cap}", result.retrieved_chunks.len());
    }
}
