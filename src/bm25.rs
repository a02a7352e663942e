//! BM25 full-text index over chunk content.
//!
//! Builds and serializes a classic Okapi BM25 inverted index, independent
//! of any vector store. Scoring uses the smoothed IDF variant
//! (`ln((N - df + 0.5) / (df + 0.5) + 1)`) so terms appearing in every
//! document still contribute a small positive weight instead of going
//! negative.

use std::collections::HashMap;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkTier, ChunkType};
use crate::error::{Bm25Error, Result};
use crate::tokenizer::tokenize;

/// Default term-frequency saturation parameter.
pub const DEFAULT_K1: f64 = 1.5;
/// Default length-normalization parameter.
pub const DEFAULT_B: f64 = 0.75;

/// One occurrence of a term in a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    /// Index into the index's `doc_ids`/`doc_lengths` arrays.
    pub doc_index: usize,
    /// Number of times the term occurs in that document.
    pub term_freq: u32,
}

/// Restricts a BM25 search to documents matching these fields.
#[derive(Debug, Clone, Default)]
pub struct Bm25Filter {
    /// Restrict to this tier, if set.
    pub tier: Option<ChunkTier>,
    /// Restrict to one of these chunk types, if set.
    pub chunk_types: Option<Vec<ChunkType>>,
}

impl Bm25Filter {
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
        true
    }
}

/// A single search hit.
#[derive(Debug, Clone)]
pub struct Bm25Hit {
    /// The matching chunk's id.
    pub chunk_id: String,
    /// The BM25 relevance score (unbounded, higher is more relevant).
    pub score: f64,
}

/// A persistable BM25 inverted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Index {
    k1: f64,
    b: f64,
    inverted_index: HashMap<String, Vec<Posting>>,
    doc_ids: Vec<String>,
    doc_lengths: Vec<usize>,
    /// Metadata needed to apply filters at search time, parallel to `doc_ids`.
    doc_tiers: Vec<ChunkTier>,
    doc_chunk_types: Vec<Option<ChunkType>>,
    avg_doc_length: f64,
    idf_cache: HashMap<String, f64>,
    is_built: bool,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new(DEFAULT_K1, DEFAULT_B)
    }
}

impl Bm25Index {
    /// Creates an empty, unbuilt index with the given BM25 parameters.
    #[must_use]
    pub fn new(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            inverted_index: HashMap::new(),
            doc_ids: Vec::new(),
            doc_lengths: Vec::new(),
            doc_tiers: Vec::new(),
            doc_chunk_types: Vec::new(),
            avg_doc_length: 0.0,
            idf_cache: HashMap::new(),
            is_built: false,
        }
    }

    /// Whether `build_index` has been called successfully.
    #[must_use]
    pub const fn is_built(&self) -> bool {
        self.is_built
    }

    /// Number of documents currently indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    /// Whether the index holds zero documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Tokenizes and indexes every chunk, replacing any previously built
    /// index. Tokenization runs in parallel across chunks; postings are
    /// merged single-threaded to avoid lock contention on the shared map.
    ///
    /// An empty `chunks` slice is not an error: it builds a valid, empty
    /// index (`num_docs = 0`, `avg_doc_length = 0.0`) against which `search`
    /// returns no hits.
    pub fn build_index(&mut self, chunks: &[Chunk]) -> Result<()> {
        let per_doc_terms: Vec<HashMap<String, u32>> = chunks
            .par_iter()
            .map(|chunk| {
                let mut counts: HashMap<String, u32> = HashMap::new();
                for token in tokenize(&chunk.content, true) {
                    *counts.entry(token).or_insert(0) += 1;
                }
                counts
            })
            .collect();

        let mut inverted_index: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(chunks.len());
        let mut doc_ids = Vec::with_capacity(chunks.len());
        let mut doc_tiers = Vec::with_capacity(chunks.len());
        let mut doc_chunk_types = Vec::with_capacity(chunks.len());

        for (doc_index, (chunk, counts)) in chunks.iter().zip(per_doc_terms.iter()).enumerate() {
            let doc_len: usize = counts.values().map(|&c| c as usize).sum();
            doc_lengths.push(doc_len);
            doc_ids.push(chunk.id.clone());
            doc_tiers.push(chunk.metadata.tier);
            doc_chunk_types.push(chunk.metadata.chunk_type);

            for (term, &term_freq) in counts {
                inverted_index
                    .entry(term.clone())
                    .or_default()
                    .push(Posting {
                        doc_index,
                        term_freq,
                    });
            }
        }

        let num_docs = doc_lengths.len();
        let avg_doc_length = if num_docs == 0 {
            0.0
        } else {
            doc_lengths.iter().sum::<usize>() as f64 / num_docs as f64
        };

        let mut idf_cache = HashMap::with_capacity(inverted_index.len());
        for (term, postings) in &inverted_index {
            let df = postings.len() as f64;
            let n = num_docs as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            idf_cache.insert(term.clone(), idf);
        }

        self.inverted_index = inverted_index;
        self.doc_ids = doc_ids;
        self.doc_lengths = doc_lengths;
        self.doc_tiers = doc_tiers;
        self.doc_chunk_types = doc_chunk_types;
        self.avg_doc_length = avg_doc_length;
        self.idf_cache = idf_cache;
        self.is_built = true;
        Ok(())
    }

    /// Scores every indexed document against `query` and returns the top
    /// `top_k` by descending score. Zero-score documents are excluded.
    ///
    /// `filter` is applied before ranking by supplying chunk metadata for
    /// each candidate via `chunks`; callers that have no metadata handy can
    /// pass an empty slice together with `Bm25Filter::default()`.
    pub fn search(&self, query: &str, top_k: usize, filter: &Bm25Filter, chunks: &[Chunk]) -> Result<Vec<Bm25Hit>> {
        if !self.is_built {
            return Err(Bm25Error::IndexNotBuilt.into());
        }

        let query_tokens = tokenize(query, true);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_by_id: HashMap<&str, &Chunk> =
            chunks.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut scores = vec![0.0f64; self.doc_ids.len()];
        for term in &query_tokens {
            let Some(postings) = self.inverted_index.get(term) else {
                continue;
            };
            let idf = self.idf_cache.get(term).copied().unwrap_or(0.0);
            for posting in postings {
                let doc_len = self.doc_lengths[posting.doc_index] as f64;
                let tf = f64::from(posting.term_freq);
                let denom = tf + self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_doc_length.max(1.0));
                scores[posting.doc_index] += idf * tf * (self.k1 + 1.0) / denom;
            }
        }

        let mut hits: Vec<Bm25Hit> = scores
            .into_iter()
            .enumerate()
            .filter(|&(_, score)| score > 0.0)
            .filter_map(|(doc_index, score)| {
                let chunk_id = &self.doc_ids[doc_index];
                let passes_filter = match chunk_by_id.get(chunk_id.as_str()) {
                    Some(chunk) => filter.matches(chunk),
                    None => {
                        filter.tier.is_none_or(|t| self.doc_tiers[doc_index] == t)
                            && filter.chunk_types.as_ref().is_none_or(|types| {
                                self.doc_chunk_types[doc_index].is_some_and(|ct| types.contains(&ct))
                            })
                    }
                };
                passes_filter.then(|| Bm25Hit {
                    chunk_id: chunk_id.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Serializes the index to `path` as a single JSON artifact.
    pub fn save_index(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).map_err(Bm25Error::Serialization)?;
        std::fs::write(path, json).map_err(|e| Bm25Error::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Loads an index previously written by [`Bm25Index::save_index`].
    pub fn load_index(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Bm25Error::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let index = serde_json::from_str(&contents).map_err(Bm25Error::Serialization)?;
        Ok(index)
    }
}
