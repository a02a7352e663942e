//! Maps a classified [`Intent`](crate::query_enhancer::Intent) to the
//! context-assembly parameters that shape how much material the final
//! answer gets to see.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::query_enhancer::Intent;

/// How the assembled context should be framed for the downstream answer
/// generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// A narrow answer about one specific facet.
    Specific,
    /// A side-by-side comparison across facets.
    Comparison,
    /// An enumerated list of steps.
    List,
    /// A longer explanatory answer.
    Explanation,
    /// A broad, unscoped overview.
    General,
}

/// Parameters controlling how many chunks/siblings get assembled into the
/// final context for a given intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Presentation mode for the downstream generator.
    pub mode: ContextMode,
    /// Number of top-ranked procedures to include.
    pub chunks: usize,
    /// Max child chunks per included procedure.
    pub max_descendants: usize,
    /// Max additional "related" chunks pulled from other procedures.
    pub max_siblings: usize,
    /// Whether to prepend each procedure's parent overview chunk.
    pub include_parents: bool,
    /// Whether the generator should produce structured (vs. prose) output.
    pub enable_structured_output: bool,
}

impl ContextConfig {
    /// Rough token-budget estimate for this configuration, given an average
    /// per-chunk token count (defaults to 440 for the shipped corpus).
    #[must_use]
    pub fn estimated_tokens(&self, avg_chunk_tokens: usize) -> usize {
        let parent_tokens = if self.include_parents { self.chunks * 428 } else { 0 };
        let descendant_tokens = self.chunks * self.max_descendants * avg_chunk_tokens;
        let sibling_tokens = self.max_siblings * avg_chunk_tokens;
        parent_tokens + descendant_tokens + sibling_tokens
    }
}

static INTENT_CONTEXT_MAPPING: LazyLock<HashMap<&'static str, ContextConfig>> = LazyLock::new(|| {
    HashMap::from([
        (
            "documents",
            ContextConfig {
                mode: ContextMode::Specific,
                chunks: 2,
                max_descendants: 5,
                max_siblings: 2,
                include_parents: true,
                enable_structured_output: true,
            },
        ),
        (
            "fees",
            ContextConfig {
                mode: ContextMode::Specific,
                chunks: 2,
                max_descendants: 3,
                max_siblings: 1,
                include_parents: true,
                enable_structured_output: true,
            },
        ),
        (
            "location",
            ContextConfig {
                mode: ContextMode::Specific,
                chunks: 2,
                max_descendants: 3,
                max_siblings: 1,
                include_parents: true,
                enable_structured_output: true,
            },
        ),
        (
            "requirements",
            ContextConfig {
                mode: ContextMode::Comparison,
                chunks: 2,
                max_descendants: 2,
                max_siblings: 3,
                include_parents: true,
                enable_structured_output: true,
            },
        ),
        (
            "process",
            ContextConfig {
                mode: ContextMode::List,
                chunks: 2,
                max_descendants: 40,
                max_siblings: 5,
                include_parents: true,
                enable_structured_output: true,
            },
        ),
        (
            "legal",
            ContextConfig {
                mode: ContextMode::Explanation,
                chunks: 3,
                max_descendants: 4,
                max_siblings: 3,
                include_parents: true,
                enable_structured_output: true,
            },
        ),
        (
            "timeline",
            ContextConfig {
                mode: ContextMode::Explanation,
                chunks: 3,
                max_descendants: 4,
                max_siblings: 3,
                include_parents: true,
                enable_structured_output: true,
            },
        ),
        (
            "overview",
            ContextConfig {
                mode: ContextMode::General,
                chunks: 3,
                max_descendants: 5,
                max_siblings: 2,
                include_parents: true,
                enable_structured_output: false,
            },
        ),
    ])
});

/// Looks up the context configuration for `intent`, falling back to the
/// `"overview"` entry for any intent with no dedicated mapping (there is
/// none currently, but this keeps the lookup total as the intent set grows).
#[must_use]
pub fn get_context_config(intent: Intent) -> ContextConfig {
    let key = match intent {
        Intent::Documents => "documents",
        Intent::Requirements => "requirements",
        Intent::Process => "process",
        Intent::Legal => "legal",
        Intent::Timeline => "timeline",
        Intent::Fees => "fees",
        Intent::Location => "location",
        Intent::Overview => "overview",
    };
    INTENT_CONTEXT_MAPPING
        .get(key)
        .copied()
        .unwrap_or_else(|| INTENT_CONTEXT_MAPPING["overview"])
}

/// Returns every intent name with a dedicated context configuration,
/// `"overview"` included.
#[must_use]
pub fn all_intents() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = INTENT_CONTEXT_MAPPING.keys().copied().collect();
    names.sort_unstable();
    names
}
