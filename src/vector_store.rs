//! The vector store adapter: a contract for an opaque dense-vector backend.
//!
//! Production backends (Qdrant and similar) implement [`VectorStore`]
//! externally; this module ships only a brute-force in-memory
//! implementation for tests and small corpora.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::chunk::{Chunk, ChunkTier, ChunkType};
use crate::embedding::cosine_similarity;
use crate::error::{Result, VectorStoreError};

/// Restricts a vector search to points matching these fields.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    /// Restrict to this tier, if set.
    pub tier: Option<ChunkTier>,
    /// Restrict to one of these chunk types, if set.
    pub chunk_types: Option<Vec<ChunkType>>,
    /// Restrict to this exact procedure code, if set.
    pub procedure_code: Option<String>,
}

impl VectorFilter {
    fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(tier) = self.tier {
            if chunk.metadata.tier != tier {
                return false;
            }
        }
        if let Some(types) = &self.chunk_types {
            match chunk.metadata.chunk_type {
                Some(ct) if types.contains(&ct) => {}
                _ => return false,
            }
        }
        if let Some(code) = &self.procedure_code {
            if chunk.procedure_code() != Some(code.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A single vector search hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// The matching chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query vector, in `[-1.0, 1.0]`.
    pub similarity: f32,
}

/// Contract for a dense-vector nearest-neighbor backend.
///
/// Implementations must be thread-safe: the pipeline may share one store
/// across concurrently executing retrieval requests.
pub trait VectorStore: Send + Sync {
    /// Returns the `top_k` nearest points to `query_embedding` matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the query (e.g. a
    /// dimensionality mismatch).
    fn search(&self, query_embedding: &[f32], top_k: usize, filter: &VectorFilter) -> Result<Vec<VectorHit>>;

    /// Looks up every chunk for a given exact procedure code, independent of
    /// similarity — used by exact-code routing.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the query.
    fn search_by_code(&self, procedure_code: &str, filter: &VectorFilter) -> Result<Vec<Chunk>>;

    /// Inserts or replaces the embedding and chunk for a point.
    ///
    /// # Errors
    ///
    /// Returns an error if `embedding`'s length does not match the
    /// collection's configured dimensionality.
    fn upsert(&self, chunk: Chunk, embedding: Vec<f32>) -> Result<()>;
}

struct Point {
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// A brute-force, cosine-scan vector store held entirely in memory.
///
/// Grounded in the teacher's posture toward vector search: when no native
/// ANN backend is compiled in, fall back to exhaustive scan rather than
/// failing outright.
pub struct InMemoryVectorStore {
    dimensions: usize,
    points: RwLock<HashMap<String, Point>>,
}

impl InMemoryVectorStore {
    /// Creates an empty store expecting `dimensions`-length embeddings.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            points: RwLock::new(HashMap::new()),
        }
    }

    /// Number of points currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Whether the store holds zero points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VectorStore for InMemoryVectorStore {
    fn search(&self, query_embedding: &[f32], top_k: usize, filter: &VectorFilter) -> Result<Vec<VectorHit>> {
        if query_embedding.len() != self.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                actual: query_embedding.len(),
                expected: self.dimensions,
            }
            .into());
        }

        let points = self.points.read().map_err(|_| VectorStoreError::Backend("lock poisoned".to_string()))?;
        let mut hits: Vec<VectorHit> = points
            .values()
            .filter(|p| filter.matches(&p.chunk))
            .map(|p| VectorHit {
                chunk: p.chunk.clone(),
                similarity: cosine_similarity(query_embedding, &p.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn search_by_code(&self, procedure_code: &str, filter: &VectorFilter) -> Result<Vec<Chunk>> {
        let points = self.points.read().map_err(|_| VectorStoreError::Backend("lock poisoned".to_string()))?;
        let mut merged = filter.clone();
        merged.procedure_code = Some(procedure_code.to_string());
        Ok(points
            .values()
            .filter(|p| merged.matches(&p.chunk))
            .map(|p| p.chunk.clone())
            .collect())
    }

    fn upsert(&self, chunk: Chunk, embedding: Vec<f32>) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                actual: embedding.len(),
                expected: self.dimensions,
            }
            .into());
        }
        let mut points = self.points.write().map_err(|_| VectorStoreError::Backend("lock poisoned".to_string()))?;
        points.insert(chunk.id.clone(), Point { chunk, embedding });
        Ok(())
    }
}
