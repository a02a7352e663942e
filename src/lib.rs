//! # tthc-retrieval
//!
//! A hierarchical hybrid retrieval core for tiered administrative-procedure
//! document corpora.
//!
//! Documents are modeled as a two-tier hierarchy: one parent chunk per
//! procedure (an overview) and many child chunks, each scoped to a single
//! facet (required documents, eligibility requirements, process steps,
//! legal basis, fees and timing, responsible agencies). [`RetrievalPipeline`]
//! answers a natural-language question by combining:
//!
//! - keyword search over a [`Bm25Index`](bm25::Bm25Index)
//! - dense nearest-neighbor search over a [`VectorStore`](vector_store::VectorStore)
//! - reciprocal rank fusion across both ([`fusion`])
//! - ensemble reranking ([`reranker`])
//! - intent-driven context assembly ([`context_config`])
//!
//! with an exact-procedure-code fast path bypassing hybrid search entirely,
//! and an optional [`SemanticCache`](cache::SemanticCache) in front of the
//! whole dataflow.

pub mod bm25;
pub mod cache;
pub mod chunk;
pub mod cli;
pub mod context_config;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod llm;
pub mod pipeline;
pub mod query_enhancer;
pub mod reranker;
pub mod tokenizer;
pub mod vector_store;

pub use error::{Error, Result};

pub use bm25::{Bm25Filter, Bm25Hit, Bm25Index};
pub use cache::{CacheStats, SemanticCache};
pub use chunk::{Chunk, ChunkMetadata, ChunkTier, ChunkType, ComplexityLevel};
pub use cli::{Cli, Commands, OutputFormat, execute, format_error};
pub use context_config::{ContextConfig, ContextMode, get_context_config};
pub use embedding::{DEFAULT_DIMENSIONS, Embedder, FallbackEmbedder, HttpEmbedder, cosine_similarity};
pub use fusion::{FusedScore, RrfConfig, reciprocal_rank_fusion};
pub use llm::{HttpLlmClient, LlmClient, NullLlmClient};
pub use pipeline::{RetrievalConfig, RetrievalMetadata, RetrievalPipeline, RetrievalResult, RetrievedChunk};
pub use query_enhancer::{Intent, QueryDescriptor, QueryEnhancer, QueryEntities};
pub use reranker::{RerankCandidate, RerankResult, Reranker};
pub use tokenizer::tokenize;
pub use vector_store::{InMemoryVectorStore, VectorFilter, VectorHit, VectorStore};
