//! Configuration for the retrieval pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use knot_embeddings::{
    CachedProvider, DEFAULT_DIMENSION, EmbeddingProvider, EncoderConfig, HashingProvider,
    OpenAIProvider, TruncationPolicy,
};

use crate::document::Granularity;
use crate::error::{Result, RetrievalError};
use crate::segmenter::SegmenterConfig;

/// Configuration for the retrieval pipeline.
///
/// Every section has defaults, so a TOML file only needs the keys it
/// changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Dataset column mapping.
    pub dataset: DatasetConfig,

    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Query processing configuration.
    pub query: QueryConfig,

    /// Sentence segmentation configuration.
    pub segmenter: SegmenterConfig,

    /// Whether units are sentences or whole descriptions.
    pub granularity: Granularity,
}

impl RetrievalConfig {
    /// Parse a configuration from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RetrievalError::Config(e.to_string()))
    }

    /// Read a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| RetrievalError::Config(format!("{}: {e}", path.display())))
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    /// Set the query configuration.
    pub fn with_query(mut self, config: QueryConfig) -> Self {
        self.query = config;
        self
    }

    /// Set the unit granularity.
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }
}

/// Which dataset columns hold the identifier and the description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Identifier column.
    pub id_column: String,

    /// Free-text description column.
    pub text_column: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            id_column: "rotten_tomatoes_link".to_string(),
            text_column: "movie_info".to_string(),
        }
    }
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which provider to use.
    pub provider: EmbeddingProviderType,

    /// Model to use for embeddings.
    pub model: Option<String>,

    /// Output dimension.
    pub dimensions: Option<usize>,

    /// Base URL for OpenAI-compatible APIs.
    pub base_url: Option<String>,

    /// Per-request timeout for remote providers.
    pub timeout_secs: u64,

    /// Where local models are cached on disk.
    pub model_cache_dir: Option<PathBuf>,

    /// Token limit override.
    pub max_tokens: Option<usize>,

    /// What to do with over-long input.
    pub truncation: TruncationPolicy,

    /// Whether to cache embeddings.
    pub cache_enabled: bool,

    /// Maximum cache size.
    pub cache_max_entries: usize,

    /// How many units are encoded at once during a build.
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::Hashing,
            model: None,
            dimensions: None,
            base_url: None,
            timeout_secs: 30,
            model_cache_dir: None,
            max_tokens: None,
            truncation: TruncationPolicy::Truncate,
            cache_enabled: true,
            cache_max_entries: 10_000,
            concurrency: 4,
        }
    }
}

impl EmbeddingConfig {
    /// Encoder settings derived from this configuration.
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            model: self.model.clone(),
            dimensions: self.dimensions,
            max_tokens: self.max_tokens,
            truncation: self.truncation,
        }
    }

    /// Construct the configured provider.
    ///
    /// Local models are loaded here, once; the returned provider is shared
    /// by every encode call of the pipeline that owns it.
    pub fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        match self.provider {
            EmbeddingProviderType::Hashing => {
                let dimension = self.dimensions.unwrap_or(DEFAULT_DIMENSION);
                Ok(self.shared(HashingProvider::new(dimension)))
            }
            EmbeddingProviderType::OpenAI => {
                let mut provider = OpenAIProvider::new()
                    .with_timeout(Duration::from_secs(self.timeout_secs.max(1)))?;
                if let Some(model) = &self.model {
                    provider = provider.with_model(model);
                }
                if let Some(base_url) = &self.base_url {
                    provider = provider.with_base_url(base_url);
                }
                if !provider.is_available() {
                    return Err(RetrievalError::Config(
                        "openai provider needs OPENAI_API_KEY".to_string(),
                    ));
                }
                Ok(self.shared(provider))
            }
            EmbeddingProviderType::Local => self.local_provider(),
        }
    }

    #[cfg(feature = "local-model")]
    fn local_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let model = self.model.as_deref().unwrap_or("all-MiniLM-L6-v2");
        let provider = knot_embeddings::LocalProvider::new(model, self.model_cache_dir.clone())?;
        Ok(self.shared(provider))
    }

    #[cfg(not(feature = "local-model"))]
    fn local_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        Err(RetrievalError::Config(
            "local provider requires the `local-model` feature".to_string(),
        ))
    }

    fn shared<P>(&self, provider: P) -> Arc<dyn EmbeddingProvider>
    where
        P: EmbeddingProvider + 'static,
    {
        if self.cache_enabled {
            Arc::new(CachedProvider::new(provider, self.cache_max_entries))
        } else {
            Arc::new(provider)
        }
    }
}

/// Type of embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// Deterministic feature hashing; no model needed.
    Hashing,
    /// OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
    /// Local ONNX sentence-transformer.
    Local,
}

impl std::str::FromStr for EmbeddingProviderType {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hashing" => Ok(Self::Hashing),
            "openai" => Ok(Self::OpenAI),
            "local" => Ok(Self::Local),
            other => Err(RetrievalError::Config(format!(
                "unknown embedding provider: {other}"
            ))),
        }
    }
}

/// Configuration for query processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Number of results when the caller does not say.
    pub default_k: usize,

    /// Minimum similarity for a hit (-1.0 keeps everything).
    pub min_score: f32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            min_score: -1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RetrievalConfig::from_toml_str(
            r#"
            granularity = "document"

            [dataset]
            text_column = "synopsis"

            [embedding]
            provider = "openai"
            model = "text-embedding-3-large"
            truncation = "reject"
            "#,
        )
        .unwrap();

        assert_eq!(config.granularity, Granularity::Document);
        assert_eq!(config.dataset.id_column, "rotten_tomatoes_link");
        assert_eq!(config.dataset.text_column, "synopsis");
        assert_eq!(config.embedding.provider, EmbeddingProviderType::OpenAI);
        assert_eq!(config.embedding.truncation, TruncationPolicy::Reject);
        assert_eq!(config.embedding.concurrency, 4);
        assert_eq!(config.query.default_k, 5);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(matches!(
            RetrievalConfig::from_toml_str("[embedding]\nprovider = \"word2vec\"\n"),
            Err(RetrievalError::Config(_))
        ));
        assert!("word2vec".parse::<EmbeddingProviderType>().is_err());
    }

    #[test]
    fn test_hashing_provider_uses_configured_dimension() {
        let config = EmbeddingConfig {
            dimensions: Some(32),
            ..Default::default()
        };
        let provider = config.build_provider().unwrap();
        assert_eq!(provider.default_dimension(), 32);
        assert_eq!(config.encoder_config().dimensions, Some(32));
    }

    #[cfg(not(feature = "local-model"))]
    #[test]
    fn test_local_provider_needs_feature() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderType::Local,
            ..Default::default()
        };
        assert!(matches!(
            config.build_provider(),
            Err(RetrievalError::Config(_))
        ));
    }
}
