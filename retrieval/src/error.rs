//! Error types for the retrieval pipeline.

use thiserror::Error;

use crate::pipeline::PipelineState;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the retrieval pipeline.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Building the store failed on a document; nothing was kept.
    #[error("build failed on document {document_id}: {source}")]
    Build {
        document_id: String,
        #[source]
        source: knot_embeddings::EmbeddingError,
    },

    /// The store holds no embeddings.
    #[error("cannot query an empty store")]
    EmptyStore,

    /// Operation not allowed in the current pipeline state.
    #[error("pipeline is {actual}, expected {expected}")]
    InvalidState {
        expected: PipelineState,
        actual: PipelineState,
    },

    /// Embedding error.
    #[error(transparent)]
    Embedding(#[from] knot_embeddings::EmbeddingError),

    /// The input dataset is unusable.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// CSV error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
