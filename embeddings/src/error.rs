//! Error types for the embeddings system.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider not configured.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// In-process model failed to load or run.
    #[error("model error: {0}")]
    Model(String),

    /// Text too long for the encoder and truncation is disabled.
    #[error("text too long: {length} tokens, max {max_length}")]
    TextTooLong { length: usize, max_length: usize },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A vector with no components.
    #[error("empty embedding for {id}")]
    EmptyEmbedding { id: String },

    /// The store already holds this identifier.
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// The store does not hold this identifier.
    #[error("identifier not found: {0}")]
    NotFound(String),

    /// Result count must be at least one.
    #[error("invalid k: {k} (must be at least 1)")]
    InvalidK { k: usize },

    /// A persisted row could not be interpreted.
    #[error("invalid record at line {line}: {reason}")]
    InvalidRecord { line: u64, reason: String },

    /// CSV error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EmbeddingError {
    /// Whether this error came from producing a vector, as opposed to
    /// storing or ranking one.
    pub fn is_encoding(&self) -> bool {
        matches!(
            self,
            Self::ProviderNotConfigured
                | Self::ApiRequest(_)
                | Self::InvalidResponse(_)
                | Self::RateLimited { .. }
                | Self::Model(_)
                | Self::TextTooLong { .. }
                | Self::Http(_)
        )
    }
}
