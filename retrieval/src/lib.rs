//! # Retrieval
//!
//! This crate answers "which movies are most like this description?" over a
//! catalog of free-text descriptions. It combines:
//!
//! - **Segmentation**: Descriptions split into sentences
//! - **Embeddings**: Each sentence encoded through `knot-embeddings`
//! - **Ranking**: Cosine top-k over the stored vectors
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Retrieval Pipeline                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Dataset ──► Document ──► SentenceSegmenter ──► SentenceUnit    │
//! │                                                     │           │
//! │                                                     ▼           │
//! │                      Encoder ──────────────► EmbeddingStore     │
//! │                         │                           │           │
//! │                         ▼                           ▼           │
//! │                       query ──────────────────► rank()          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pipeline moves through `Unbuilt → Built → Queryable`; only a
//! queryable pipeline answers queries.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use knot_retrieval::{Document, RetrievalConfig, RetrievalPipeline};
//!
//! let mut pipeline = RetrievalPipeline::from_config(&RetrievalConfig::default())?;
//! pipeline
//!     .build(&[Document::new("m1", Some("A hero saves the city. It is thrilling."))])
//!     .await?;
//! pipeline.ready_for_query()?;
//!
//! let results = pipeline.query("a hero saves a city", 5).await?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod segmenter;

pub use config::{
    DatasetConfig, EmbeddingConfig, EmbeddingProviderType, QueryConfig, RetrievalConfig,
};
pub use document::{Dataset, Document, Granularity, SentenceUnit};
pub use error::{Result, RetrievalError};
pub use pipeline::{
    BuildReport, DocumentMatch, PipelineState, PipelineStats, RetrievalPipeline,
    RetrievalPipelineBuilder,
};
pub use segmenter::{SegmenterConfig, SentenceSegmenter};

// Re-export from dependencies for convenience
pub use knot_embeddings::{EmbeddingProvider, EmbeddingStore, Encoder, RankedResult};
