//! Error types for the retrieval core.
//!
//! Follows a layered `thiserror` hierarchy: one top-level [`Error`] enum
//! wrapping a leaf enum per subsystem, so callers can match narrowly on
//! `Error::Bm25(Bm25Error::IndexNotBuilt)` without needing to know about
//! unrelated subsystems.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the retrieval core.
#[derive(Error, Debug)]
pub enum Error {
    /// BM25 index errors.
    #[error("bm25 error: {0}")]
    Bm25(#[from] Bm25Error),

    /// Vector store adapter errors.
    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    /// Embedding generation errors.
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    /// Semantic cache errors.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// End-to-end retrieval pipeline errors.
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// Invalid configuration supplied to a component.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },
}

/// BM25 index-specific errors.
#[derive(Error, Debug)]
pub enum Bm25Error {
    /// `search` or `save_index` called before `build_index`.
    #[error("bm25 index has not been built")]
    IndexNotBuilt,

    /// Failed to serialize or deserialize the persisted index.
    #[error("index (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write the index file.
    #[error("index I/O failed: {path}: {reason}")]
    Io {
        /// Path of the index artifact.
        path: String,
        /// Underlying error text.
        reason: String,
    },
}

/// Vector store adapter errors.
#[derive(Error, Debug)]
pub enum VectorStoreError {
    /// Query embedding dimensionality does not match the collection's.
    #[error("dimension mismatch: query has {actual}, collection expects {expected}")]
    DimensionMismatch {
        /// Dimensionality supplied by the caller.
        actual: usize,
        /// Dimensionality the collection was created with.
        expected: usize,
    },

    /// The requested collection does not exist.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Collection name.
        name: String,
    },

    /// The backend rejected the operation.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Embedding generation errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// The embedding service returned a malformed response.
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    /// Transport-level failure talking to the embedding service.
    ///
    /// Callers that need a fail-soft embedder (zero vector + warning
    /// instead of propagating) catch this at the `Embedder` impl, not here.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Semantic cache errors.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache's internal lock was poisoned by a panicking holder.
    #[error("cache lock poisoned")]
    LockPoisoned,
}

/// End-to-end retrieval pipeline errors.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// No collaborator (vector store, embedder) was able to produce results
    /// and no fallback path applied.
    #[error("retrieval failed: {0}")]
    Failed(String),

    /// A required collaborator was not configured for the requested operation.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(String),
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_wraps_subsystem() {
        let err: Error = Bm25Error::IndexNotBuilt.into();
        assert_eq!(err.to_string(), "bm25 error: bm25 index has not been built");
    }

    #[test]
    fn config_error_display() {
        let err = Error::Config {
            message: "bad weight".to_string(),
        };
        assert_eq!(err.to_string(), "configuration error: bad weight");
    }

    #[test]
    fn vector_store_dimension_mismatch_display() {
        let err = VectorStoreError::DimensionMismatch {
            actual: 128,
            expected: 1024,
        };
        assert!(err.to_string().contains("128"));
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn transport_error_roundtrip() {
        let err = EmbedError::Transport("connection refused".to_string());
        assert!(matches!(err, EmbedError::Transport(_)));
        let wrapped: Error = err.into();
        assert!(matches!(wrapped, Error::Embed(EmbedError::Transport(_))));
    }

    #[test]
    fn retrieval_error_variants_display() {
        let err = RetrievalError::MissingCollaborator("embedder".to_string());
        assert!(err.to_string().contains("embedder"));
    }

    #[test]
    fn cache_error_lock_poisoned_display() {
        let err = CacheError::LockPoisoned;
        assert!(err.to_string().contains("poisoned"));
    }
}
