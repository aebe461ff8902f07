//! Encoding policy in front of an embedding provider.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest};

/// What to do with input longer than the encoder's token limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Keep the leading tokens and log a warning.
    #[default]
    Truncate,
    /// Fail with [`EmbeddingError::TextTooLong`].
    Reject,
}

/// Configuration for an [`Encoder`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Model override; the provider default is used when unset.
    pub model: Option<String>,

    /// Output dimension override, for providers that support it.
    pub dimensions: Option<usize>,

    /// Token limit override; the provider limit is used when unset.
    ///
    /// Tokens are approximated by Unicode words.
    pub max_tokens: Option<usize>,

    /// Overflow handling.
    pub truncation: TruncationPolicy,
}

/// Maps text to fixed-dimension vectors through an injected provider.
///
/// The encoder owns no model itself: whoever assembles it decides which
/// provider backs it and how long that provider lives.
#[derive(Clone)]
pub struct Encoder {
    provider: Arc<dyn EmbeddingProvider>,
    config: EncoderConfig,
    dimension: usize,
    max_tokens: Option<usize>,
}

impl Encoder {
    /// Create an encoder with the provider's defaults.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_config(provider, EncoderConfig::default())
    }

    /// Create an encoder with explicit configuration.
    pub fn with_config(provider: Arc<dyn EmbeddingProvider>, config: EncoderConfig) -> Self {
        let dimension = config
            .dimensions
            .unwrap_or_else(|| provider.default_dimension());
        let max_tokens = config.max_tokens.or_else(|| provider.max_input_tokens());
        Self {
            provider,
            config,
            dimension,
            max_tokens,
        }
    }

    /// Dimension of every vector this encoder returns.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Model the encoder asks the provider for.
    pub fn model(&self) -> &str {
        self.config
            .model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// The backing provider.
    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    /// Encode one text.
    pub async fn encode(&self, text: &str) -> Result<Embedding> {
        let request = self.request(text)?;
        let response = self.provider.embed(request).await?;
        self.check(response.embedding)
    }

    /// Encode several texts, preserving order.
    pub async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let requests = texts
            .iter()
            .map(|text| self.request(text))
            .collect::<Result<Vec<_>>>()?;
        let responses = self.provider.embed_batch(requests).await?;

        if responses.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                responses.len()
            )));
        }

        responses
            .into_iter()
            .map(|response| self.check(response.embedding))
            .collect()
    }

    fn request(&self, text: &str) -> Result<EmbeddingRequest> {
        let mut request = EmbeddingRequest::new(self.fit(text)?);
        if let Some(model) = &self.config.model {
            request = request.with_model(model);
        }
        if let Some(dimensions) = self.config.dimensions {
            request = request.with_dimensions(dimensions);
        }
        Ok(request)
    }

    /// Apply the token limit to `text`.
    fn fit<'a>(&self, text: &'a str) -> Result<&'a str> {
        let Some(max_tokens) = self.max_tokens else {
            return Ok(text);
        };

        let mut words = text.unicode_word_indices();
        let Some((cut, _)) = words.by_ref().nth(max_tokens) else {
            return Ok(text);
        };
        let length = max_tokens + 1 + words.count();

        match self.config.truncation {
            TruncationPolicy::Reject => Err(EmbeddingError::TextTooLong {
                length,
                max_length: max_tokens,
            }),
            TruncationPolicy::Truncate => {
                warn!(
                    tokens = length,
                    kept = max_tokens,
                    "Input exceeds encoder limit, dropping trailing tokens"
                );
                Ok(text[..cut].trim_end())
            }
        }
    }

    fn check(&self, embedding: Embedding) -> Result<Embedding> {
        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("provider", &self.provider.name())
            .field("model", &self.model())
            .field("dimension", &self.dimension)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EmbeddingResponse, HashingProvider};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Records the texts it was asked to embed.
    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Vec<String>>,
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn default_model(&self) -> &str {
            "recording-model"
        }

        fn default_dimension(&self) -> usize {
            3
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            self.seen.lock().unwrap().push(request.text);
            Ok(EmbeddingResponse {
                embedding: vec![1.0; self.dimension],
                model: "recording-model".to_string(),
                dimension: self.dimension,
                tokens_used: None,
            })
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn limited(truncation: TruncationPolicy) -> (Arc<RecordingProvider>, Encoder) {
        let provider = Arc::new(RecordingProvider {
            dimension: 3,
            ..Default::default()
        });
        let encoder = Encoder::with_config(
            provider.clone(),
            EncoderConfig {
                max_tokens: Some(3),
                truncation,
                ..Default::default()
            },
        );
        (provider, encoder)
    }

    #[tokio::test]
    async fn test_encode_is_deterministic() {
        let encoder = Encoder::new(Arc::new(HashingProvider::new(16)));
        let first = encoder.encode("It is thrilling.").await.unwrap();
        let second = encoder.encode("It is thrilling.").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
    }

    #[tokio::test]
    async fn test_truncate_keeps_leading_words() {
        let (provider, encoder) = limited(TruncationPolicy::Truncate);
        encoder
            .encode("One two, three four five.")
            .await
            .unwrap();

        assert_eq!(*provider.seen.lock().unwrap(), vec!["One two, three"]);
    }

    #[tokio::test]
    async fn test_within_limit_is_passed_through() {
        let (provider, encoder) = limited(TruncationPolicy::Reject);
        encoder.encode("One two three.").await.unwrap();
        assert_eq!(*provider.seen.lock().unwrap(), vec!["One two three."]);
    }

    #[tokio::test]
    async fn test_reject_policy_errors() {
        let (provider, encoder) = limited(TruncationPolicy::Reject);
        let err = encoder.encode("one two three four").await.unwrap_err();

        assert!(matches!(
            err,
            EmbeddingError::TextTooLong {
                length: 4,
                max_length: 3
            }
        ));
        assert!(provider.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_token_limit_keeps_nothing() {
        let provider = Arc::new(RecordingProvider {
            dimension: 3,
            ..Default::default()
        });
        let config = |truncation| EncoderConfig {
            max_tokens: Some(0),
            truncation,
            ..Default::default()
        };

        let truncating = Encoder::with_config(provider.clone(), config(TruncationPolicy::Truncate));
        truncating.encode("Heist movie.").await.unwrap();
        assert_eq!(*provider.seen.lock().unwrap(), vec![""]);

        let rejecting = Encoder::with_config(provider.clone(), config(TruncationPolicy::Reject));
        assert!(matches!(
            rejecting.encode("Heist movie.").await,
            Err(EmbeddingError::TextTooLong {
                length: 2,
                max_length: 0
            })
        ));
        assert_eq!(provider.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_dimension_from_provider() {
        let provider = Arc::new(RecordingProvider {
            dimension: 5,
            ..Default::default()
        });
        let encoder = Encoder::new(provider);
        assert!(matches!(
            encoder.encode("hello").await,
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 5
            })
        ));
    }

    #[tokio::test]
    async fn test_encode_batch_preserves_order() {
        let encoder = Encoder::new(Arc::new(HashingProvider::new(16)));
        let batch = encoder.encode_batch(&["alpha", "beta"]).await.unwrap();
        assert_eq!(batch[0], encoder.encode("alpha").await.unwrap());
        assert_eq!(batch[1], encoder.encode("beta").await.unwrap());
    }
}
