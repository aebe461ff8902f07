//! The retrieval pipeline: segment, encode, store, rank.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tracing::{debug, info, warn};

use knot_embeddings::similarity::{average, rank_entries, rank_with_threshold, validate_k};
use knot_embeddings::{Encoder, EmbeddingError, EmbeddingStore, RankedResult, StoreEntry};

use crate::config::RetrievalConfig;
use crate::document::{Document, Granularity, SentenceUnit};
use crate::error::{Result, RetrievalError};
use crate::segmenter::SentenceSegmenter;

/// Lifecycle of a [`RetrievalPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// No store yet, or the last build failed.
    Unbuilt,
    /// A store exists but has not been checked for querying.
    Built,
    /// The store is non-empty and matches the encoder.
    Queryable,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbuilt => write!(f, "unbuilt"),
            Self::Built => write!(f, "built"),
            Self::Queryable => write!(f, "queryable"),
        }
    }
}

enum Stage {
    Unbuilt,
    Built(Arc<EmbeddingStore>),
    Queryable(Arc<EmbeddingStore>),
}

impl Stage {
    fn state(&self) -> PipelineState {
        match self {
            Self::Unbuilt => PipelineState::Unbuilt,
            Self::Built(_) => PipelineState::Built,
            Self::Queryable(_) => PipelineState::Queryable,
        }
    }

    fn store(&self) -> Option<&Arc<EmbeddingStore>> {
        match self {
            Self::Unbuilt => None,
            Self::Built(store) | Self::Queryable(store) => Some(store),
        }
    }
}

/// Summary of a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Documents read.
    pub documents: usize,

    /// Documents that produced no units.
    pub empty_documents: usize,

    /// Units embedded into the store.
    pub units: usize,

    /// Vector dimension of the store.
    pub dimension: usize,
}

/// A document ranked by its best-scoring unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMatch {
    /// Document identifier.
    pub document_id: String,

    /// Similarity of the best unit.
    pub score: f32,

    /// Identifier of the best unit.
    pub best_unit_id: String,

    /// 1-based rank.
    pub rank: usize,
}

/// Statistics about a pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    /// Current state.
    pub state: PipelineState,

    /// Number of units in the store.
    pub units: usize,

    /// Dimension of the store, if it has entries.
    pub store_dimension: Option<usize>,

    /// Dimension the encoder produces.
    pub encoder_dimension: usize,

    /// Model behind the encoder.
    pub model: String,
}

/// Free-text similarity search over a document collection.
///
/// A pipeline starts `Unbuilt`. [`build`](Self::build) or
/// [`load_store`](Self::load_store) make it `Built`, and
/// [`ready_for_query`](Self::ready_for_query) makes it `Queryable`. Once
/// queryable, the store is shared read-only and queries take `&self`.
pub struct RetrievalPipeline {
    encoder: Encoder,
    segmenter: SentenceSegmenter,
    granularity: Granularity,
    concurrency: usize,
    min_score: f32,
    stage: Stage,
}

impl RetrievalPipeline {
    /// Create a pipeline builder around an encoder.
    pub fn builder(encoder: Encoder) -> RetrievalPipelineBuilder {
        RetrievalPipelineBuilder::new(encoder)
    }

    /// Assemble a pipeline from configuration, constructing its provider.
    pub fn from_config(config: &RetrievalConfig) -> Result<Self> {
        let provider = config.embedding.build_provider()?;
        let encoder = Encoder::with_config(provider, config.embedding.encoder_config());
        info!(
            "Using {} embeddings from {} ({}d)",
            encoder.model(),
            encoder.provider().name(),
            encoder.dimension()
        );

        Ok(Self::builder(encoder)
            .with_segmenter(SentenceSegmenter::with_config(&config.segmenter))
            .with_granularity(config.granularity)
            .with_concurrency(config.embedding.concurrency)
            .with_min_score(config.query.min_score)
            .build())
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.stage.state()
    }

    /// The encoder used for documents and queries.
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// The current store, once built or loaded.
    pub fn store(&self) -> Option<&EmbeddingStore> {
        self.stage.store().map(Arc::as_ref)
    }

    /// Segment, encode and store every document, replacing any previous
    /// store.
    ///
    /// Units are encoded concurrently but inserted in input order. The first
    /// failure aborts the build, names its document, and leaves the pipeline
    /// `Unbuilt`.
    pub async fn build(&mut self, documents: &[Document]) -> Result<BuildReport> {
        self.stage = Stage::Unbuilt;
        info!("Building store from {} documents", documents.len());

        let mut empty_documents = 0;
        let mut units: Vec<SentenceUnit> = Vec::new();
        for document in documents {
            let document_units = document.units(&self.segmenter, self.granularity);
            if document_units.is_empty() {
                debug!("Document {} has no text to embed", document.id);
                empty_documents += 1;
            }
            units.extend(document_units);
        }

        let mut store = EmbeddingStore::with_capacity(units.len());
        let encoder = &self.encoder;
        let mut encoded = stream::iter(&units)
            .map(move |unit| async move { (unit, encoder.encode(&unit.text).await) })
            .buffered(self.concurrency.max(1));

        while let Some((unit, embedding)) = encoded.next().await {
            let embedding = embedding.map_err(|source| build_failure(unit, source))?;
            store
                .insert(unit.id.clone(), embedding, Some(unit.provenance()))
                .map_err(|source| build_failure(unit, source))?;
            debug!("Embedded {}", unit.id);
        }

        let report = BuildReport {
            documents: documents.len(),
            empty_documents,
            units: store.len(),
            dimension: store.dimension().unwrap_or_else(|| self.encoder.dimension()),
        };
        info!(
            "Built store with {} units from {} documents",
            report.units, report.documents
        );

        self.stage = Stage::Built(Arc::new(store));
        Ok(report)
    }

    /// Adopt a previously persisted store, replacing any current one.
    pub fn load_store(&mut self, store: EmbeddingStore) {
        info!("Loaded store with {} units", store.len());
        self.stage = Stage::Built(Arc::new(store));
    }

    /// Check the store and allow queries.
    ///
    /// Calling this on a queryable pipeline is a no-op.
    pub fn ready_for_query(&mut self) -> Result<()> {
        let store = match &self.stage {
            Stage::Unbuilt => {
                return Err(RetrievalError::InvalidState {
                    expected: PipelineState::Built,
                    actual: PipelineState::Unbuilt,
                });
            }
            Stage::Queryable(_) => return Ok(()),
            Stage::Built(store) => Arc::clone(store),
        };

        if store.is_empty() {
            return Err(RetrievalError::EmptyStore);
        }
        store.validate()?;

        if let Some(dimension) = store.dimension() {
            if dimension != self.encoder.dimension() {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.encoder.dimension(),
                    actual: dimension,
                }
                .into());
            }
        }

        debug!("Pipeline ready with {} units", store.len());
        self.stage = Stage::Queryable(store);
        Ok(())
    }

    /// The `k` units most similar to `text`, best first.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RankedResult>> {
        let store = self.queryable()?;
        validate_k(k)?;

        let query = self.encoder.encode(text).await?;
        let results = rank_with_threshold(&query, store, k, self.min_score)?;
        debug!("Query matched {} units", results.len());
        Ok(results)
    }

    /// The `k` documents whose best unit is most similar to `text`.
    pub async fn query_documents(&self, text: &str, k: usize) -> Result<Vec<DocumentMatch>> {
        let store = self.queryable()?;
        validate_k(k)?;

        let query = self.encoder.encode(text).await?;
        let units = rank_with_threshold(&query, store, store.len(), self.min_score)?;
        Ok(collapse_to_documents(units, k))
    }

    /// The `k` documents most similar to `document_id`, excluding itself.
    ///
    /// The document is represented by the mean of its unit vectors.
    pub fn similar_to(&self, document_id: &str, k: usize) -> Result<Vec<DocumentMatch>> {
        let store = self.queryable()?;
        validate_k(k)?;

        let vectors: Vec<&[f32]> = store
            .entries_for_document(document_id)
            .map(|entry| entry.embedding.as_slice())
            .collect();
        if vectors.is_empty() {
            return Err(EmbeddingError::NotFound(document_id.to_string()).into());
        }
        let centroid = average(vectors)?;

        let others = store
            .entries()
            .iter()
            .filter(|entry| document_of(entry) != document_id);
        let units = rank_entries(&centroid, others, store.len(), self.min_score)?;
        Ok(collapse_to_documents(units, k))
    }

    /// Write the current store to `path`.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let store = self.stage.store().ok_or(RetrievalError::InvalidState {
            expected: PipelineState::Built,
            actual: PipelineState::Unbuilt,
        })?;
        store.persist(path)?;
        Ok(())
    }

    /// Get pipeline statistics.
    pub fn stats(&self) -> PipelineStats {
        let store = self.store();
        PipelineStats {
            state: self.state(),
            units: store.map_or(0, EmbeddingStore::len),
            store_dimension: store.and_then(EmbeddingStore::dimension),
            encoder_dimension: self.encoder.dimension(),
            model: self.encoder.model().to_string(),
        }
    }

    fn queryable(&self) -> Result<&EmbeddingStore> {
        match &self.stage {
            Stage::Queryable(store) => Ok(Arc::as_ref(store)),
            other => Err(RetrievalError::InvalidState {
                expected: PipelineState::Queryable,
                actual: other.state(),
            }),
        }
    }
}

/// Builder for [`RetrievalPipeline`].
pub struct RetrievalPipelineBuilder {
    encoder: Encoder,
    segmenter: SentenceSegmenter,
    granularity: Granularity,
    concurrency: usize,
    min_score: f32,
}

impl RetrievalPipelineBuilder {
    /// Create a new builder.
    pub fn new(encoder: Encoder) -> Self {
        Self {
            encoder,
            segmenter: SentenceSegmenter::new(),
            granularity: Granularity::default(),
            concurrency: 4,
            min_score: -1.0,
        }
    }

    /// Set the sentence segmenter.
    pub fn with_segmenter(mut self, segmenter: SentenceSegmenter) -> Self {
        self.segmenter = segmenter;
        self
    }

    /// Set the unit granularity.
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Set how many units are encoded at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Drop hits scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Build the pipeline. It starts `Unbuilt`.
    pub fn build(self) -> RetrievalPipeline {
        RetrievalPipeline {
            encoder: self.encoder,
            segmenter: self.segmenter,
            granularity: self.granularity,
            concurrency: self.concurrency,
            min_score: self.min_score,
            stage: Stage::Unbuilt,
        }
    }
}

fn build_failure(unit: &SentenceUnit, source: EmbeddingError) -> RetrievalError {
    let stage = if source.is_encoding() {
        "encode"
    } else {
        "store"
    };
    warn!(unit = %unit.id, stage, "Build failed: {source}");
    RetrievalError::Build {
        document_id: unit.document_id.clone(),
        source,
    }
}

fn document_of(entry: &StoreEntry) -> &str {
    entry
        .provenance
        .as_ref()
        .map_or(entry.id.as_str(), |provenance| provenance.document_id.as_str())
}

/// Keep the first (best) unit of each document from a ranked list.
fn collapse_to_documents(units: Vec<RankedResult>, k: usize) -> Vec<DocumentMatch> {
    let mut seen = HashSet::new();
    let mut matches = Vec::new();

    for unit in units {
        let document_id = unit
            .provenance
            .as_ref()
            .map_or_else(|| unit.id.clone(), |provenance| provenance.document_id.clone());
        if !seen.insert(document_id.clone()) {
            continue;
        }
        matches.push(DocumentMatch {
            document_id,
            score: unit.score,
            best_unit_id: unit.id,
            rank: matches.len() + 1,
        });
        if matches.len() == k {
            break;
        }
    }

    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use knot_embeddings::{HashingProvider, Provenance};
    use pretty_assertions::assert_eq;

    fn pipeline() -> RetrievalPipeline {
        RetrievalPipeline::builder(Encoder::new(Arc::new(HashingProvider::new(64)))).build()
    }

    fn ranked(id: &str, document_id: &str, score: f32) -> RankedResult {
        RankedResult {
            id: id.to_string(),
            score,
            rank: 0,
            provenance: Some(Provenance {
                document_id: document_id.to_string(),
                ordinal: 1,
                text: String::new(),
            }),
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Queryable.to_string(), "queryable");
        let err = RetrievalError::InvalidState {
            expected: PipelineState::Queryable,
            actual: PipelineState::Built,
        };
        assert_eq!(err.to_string(), "pipeline is built, expected queryable");
    }

    #[test]
    fn test_collapse_keeps_best_unit_per_document() {
        let units = vec![
            ranked("a_2", "a", 0.9),
            ranked("b_1", "b", 0.8),
            ranked("a_1", "a", 0.7),
            ranked("c_1", "c", 0.6),
        ];
        let matches = collapse_to_documents(units, 2);

        assert_eq!(
            matches,
            vec![
                DocumentMatch {
                    document_id: "a".to_string(),
                    score: 0.9,
                    best_unit_id: "a_2".to_string(),
                    rank: 1,
                },
                DocumentMatch {
                    document_id: "b".to_string(),
                    score: 0.8,
                    best_unit_id: "b_1".to_string(),
                    rank: 2,
                },
            ]
        );
    }

    #[test]
    fn test_ready_for_query_from_unbuilt() {
        let mut pipeline = pipeline();
        assert!(matches!(
            pipeline.ready_for_query(),
            Err(RetrievalError::InvalidState {
                actual: PipelineState::Unbuilt,
                ..
            })
        ));
        assert!(pipeline.persist("unused.csv").is_err());
    }

    #[test]
    fn test_loaded_store_must_match_encoder() {
        let mut store = EmbeddingStore::new();
        store.insert("m1_1", vec![1.0, 0.0, 0.0], None).unwrap();

        let mut pipeline = pipeline();
        pipeline.load_store(store);
        assert_eq!(pipeline.state(), PipelineState::Built);

        let err = pipeline.ready_for_query().unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Embedding(EmbeddingError::DimensionMismatch {
                expected: 64,
                actual: 3
            })
        ));
        assert_eq!(pipeline.state(), PipelineState::Built);
    }

    #[tokio::test]
    async fn test_stats_follow_build() {
        let mut pipeline = pipeline();
        assert_eq!(pipeline.stats().units, 0);

        pipeline
            .build(&[Document::new("m1", Some("One. Two. Three."))])
            .await
            .unwrap();
        let stats = pipeline.stats();
        assert_eq!(stats.state, PipelineState::Built);
        assert_eq!(stats.units, 3);
        assert_eq!(stats.store_dimension, Some(64));
        assert_eq!(stats.model, "feature-hashing-64");
    }
}
