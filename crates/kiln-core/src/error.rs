use std::path::PathBuf;

use kiln_index::IndexError;
use kiln_llm::LlmError;

/// Failure to produce one artifact.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("template error: {0}")]
    Template(String),

    #[error("model returned no usable content")]
    EmptyOutput,

    #[error("no service has an artifact to aggregate")]
    NoServiceArtifacts,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("project '{0}' is not indexed")]
    ProjectNotIndexed(String),

    #[error("project '{0}' has no recorded root directory")]
    ProjectRootUnknown(String),

    #[error("no services detected under {}", .0.display())]
    NoServicesDetected(PathBuf),

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] IndexError),

    #[error("generation failed for {target}: {source}")]
    Generation {
        target: String,
        #[source]
        source: GenerationError,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to ingest repository: {0}")]
    Ingest(String),
}

impl From<IndexError> for PipelineError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::ProjectNotIndexed(name) => Self::ProjectNotIndexed(name),
            IndexError::Io(err) => Self::Ingest(err.to_string()),
            IndexError::Pattern { .. } => Self::Ingest(e.to_string()),
            other => Self::Retrieval(other),
        }
    }
}
