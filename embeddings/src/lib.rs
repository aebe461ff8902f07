//! # Embeddings
//!
//! This crate turns text into dense vectors and ranks stored vectors against
//! a query for the Knot movie search.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors through a
//!   pluggable [`EmbeddingProvider`]
//! - **Encoding Policy**: [`Encoder`] applies truncation and dimension checks
//! - **Similarity Ranking**: Brute-force cosine top-k with stable ties
//! - **Embedding Store**: Insert-only vector store persisted as CSV
//! - **Caching**: LRU cache in front of any provider
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Encoder ──► EmbeddingStore               │
//! │       │                   │              │                      │
//! │       ▼                   ▼              ▼                      │
//! │  Hashing/OpenAI/Local  CachedProvider   rank()                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod encoder;
pub mod error;
#[cfg(feature = "local-model")]
pub mod local;
pub mod provider;
pub mod similarity;
pub mod store;

pub use cache::CachedProvider;
pub use encoder::{Encoder, EncoderConfig, TruncationPolicy};
pub use error::{EmbeddingError, Result};
#[cfg(feature = "local-model")]
pub use local::LocalProvider;
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HashingProvider, OpenAIProvider,
};
pub use similarity::{RankedResult, cosine_similarity, rank};
pub use store::{EmbeddingStore, Provenance, StoreEntry};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of `all-MiniLM-L6-v2`, the sentence model the catalog was
/// originally embedded with.
pub const DEFAULT_DIMENSION: usize = 384;
