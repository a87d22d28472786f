//! Error types for kiln-index.

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The named project has no collection.
    #[error("project '{0}' is not indexed")]
    ProjectNotIndexed(String),

    /// The embedding service call failed.
    #[error("embedding failed: {0}")]
    Embedding(#[from] kiln_llm::LlmError),

    /// The vector store call failed.
    #[error("vector store error: {0}")]
    Store(#[from] crate::vector_store::VectorStoreError),

    /// Invalid exclude pattern.
    #[error("invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

impl IndexError {
    /// Whether the error came from the embedding service or the vector store.
    #[must_use]
    pub fn is_retrieval(&self) -> bool {
        matches!(self, Self::Embedding(_) | Self::Store(_))
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
