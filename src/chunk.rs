//! The hierarchical chunk data model shared by every component.
//!
//! Chunks arrive pre-built from an external extraction/chunking pipeline
//! (out of scope here); this module only models their shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which tier of the parent/child hierarchy a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkTier {
    /// A procedure-overview chunk, one per procedure.
    Parent,
    /// A detail chunk scoped to a single procedure facet.
    Child,
}

/// The facet a child chunk covers. Parent chunks have no chunk type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// Required documents/paperwork.
    Documents,
    /// Eligibility requirements.
    Requirements,
    /// Procedural steps.
    Process,
    /// Legal basis and citations.
    Legal,
    /// Fees and timelines.
    FeesTiming,
    /// Responsible agencies.
    Agencies,
}

impl ChunkType {
    /// Returns the wire name used when filtering a vector store collection
    /// by chunk type (`"child_documents"`, `"child_legal"`, ...).
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Documents => "child_documents",
            Self::Requirements => "child_requirements",
            Self::Process => "child_process",
            Self::Legal => "child_legal",
            Self::FeesTiming => "child_fees_timing",
            Self::Agencies => "child_agencies",
        }
    }
}

/// How involved a chunk's content is to read and apply, set by the external
/// enrichment pipeline that produced the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    /// Short, self-contained content.
    Simple,
    /// Typical administrative detail.
    Medium,
    /// Long or cross-referencing content.
    Complex,
}

/// Domain metadata carried alongside a chunk's text content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Administrative procedure code, e.g. `"1.001234"`.
    pub procedure_code: Option<String>,
    /// Human-readable procedure name.
    pub procedure_name: Option<String>,
    /// Administrative domain/field the procedure belongs to.
    pub domain: Option<String>,
    /// Which tier this chunk occupies.
    pub tier: ChunkTier,
    /// Which facet this chunk covers, `None` for parent chunks.
    pub chunk_type: Option<ChunkType>,
    /// Id of this chunk's parent, when known.
    pub parent_chunk_id: Option<String>,
    /// A `domain > procedure > section` trail, precomputed by the
    /// enrichment pipeline that produced this chunk. Used to label context
    /// blocks when present; the pipeline falls back to assembling an
    /// equivalent label from `domain`/`procedure_name`/`chunk_type` when absent.
    #[serde(default)]
    pub breadcrumb: Option<String>,
    /// A short (roughly 200-character) prefix of the owning procedure's
    /// parent-overview content, precomputed so callers that only need a
    /// one-line summary don't have to resolve and truncate the full parent.
    #[serde(default)]
    pub parent_context: Option<String>,
    /// Ids of this chunk's siblings (other chunks of the same procedure).
    #[serde(default)]
    pub sibling_chunk_ids: Vec<String>,
    /// Ids of related procedures, sourced from an external procedure graph.
    #[serde(default)]
    pub related_procedure_ids: Vec<String>,
    /// Relevance weight in `[0.0, 1.0]` assigned by the enrichment pipeline,
    /// independent of any query (e.g. favoring a procedure's most commonly
    /// requested facet).
    #[serde(default)]
    pub importance_score: Option<f32>,
    /// How involved this chunk's content is, if classified upstream.
    #[serde(default)]
    pub complexity_level: Option<ComplexityLevel>,
    /// Free-form fields not promoted to a named column.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A single retrievable unit of text plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier, unique within the corpus.
    pub id: String,
    /// The chunk's text content.
    pub content: String,
    /// Domain and hierarchy metadata.
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Creates a new chunk.
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }

    /// Returns the procedure code this chunk belongs to, preferring the
    /// typed field but falling back to `extra["mã_thủ_tục"]` for chunks
    /// whose metadata arrived un-normalized.
    #[must_use]
    pub fn procedure_code(&self) -> Option<&str> {
        self.metadata
            .procedure_code
            .as_deref()
            .or_else(|| self.metadata.extra.get("mã_thủ_tục").and_then(serde_json::Value::as_str))
    }

    /// Word-count based token estimate (roughly 4 characters per token).
    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        self.content.len().div_ceil(4)
    }
}

impl Default for ChunkTier {
    fn default() -> Self {
        Self::Child
    }
}
