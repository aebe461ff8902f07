//! In-process sentence-transformer models via fastembed.
//!
//! The ONNX model is downloaded (or read from the cache directory) and loaded
//! once in [`LocalProvider::new`]. Inference is CPU-bound, so each call runs
//! on the blocking pool against the shared model.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

/// Local embedding provider backed by an ONNX sentence-transformer.
pub struct LocalProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
    max_tokens: usize,
}

impl LocalProvider {
    /// Load `model_name` (e.g. `all-MiniLM-L6-v2`), caching weights under
    /// `cache_dir` when given.
    pub fn new(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let (model, dimension, max_tokens) = resolve_model(model_name)?;

        let mut options = InitOptions::new(model).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }

        info!("Loading local embedding model {model_name}");
        let embedding = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::Model(format!("failed to load {model_name}: {e}")))?;
        info!("Loaded local embedding model {model_name} ({dimension}d)");

        Ok(Self {
            model: Arc::new(embedding),
            model_name: model_name.to_string(),
            dimension,
            max_tokens,
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| EmbeddingError::Model(format!("embedding task failed: {e}")))?
            .map_err(|e| EmbeddingError::Model(e.to_string()))
    }
}

fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize, usize)> {
    match name {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok((EmbeddingModel::AllMiniLML6V2, 384, 256))
        }
        "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
            Ok((EmbeddingModel::AllMiniLML12V2, 384, 256))
        }
        "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => {
            Ok((EmbeddingModel::BGESmallENV15, 384, 512))
        }
        "bge-base-en-v1.5" | "BAAI/bge-base-en-v1.5" => {
            Ok((EmbeddingModel::BGEBaseENV15, 768, 512))
        }
        other => Err(EmbeddingError::Model(format!(
            "unsupported local model: {other}"
        ))),
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn default_model(&self) -> &str {
        &self.model_name
    }

    fn default_dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_tokens(&self) -> Option<usize> {
        Some(self.max_tokens)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let embedding = self
            .run(vec![request.text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("model returned no vector".to_string()))?;

        Ok(EmbeddingResponse {
            dimension: embedding.len(),
            embedding,
            model: self.model_name.clone(),
            tokens_used: None,
        })
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let texts = requests.into_iter().map(|r| r.text).collect();
        let responses = self
            .run(texts)
            .await?
            .into_iter()
            .map(|embedding| EmbeddingResponse {
                dimension: embedding.len(),
                embedding,
                model: self.model_name.clone(),
                tokens_used: None,
            })
            .collect();
        Ok(responses)
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_models() {
        assert_eq!(resolve_model("all-MiniLM-L6-v2").unwrap().1, 384);
        assert_eq!(resolve_model("BAAI/bge-base-en-v1.5").unwrap().1, 768);
    }

    #[test]
    fn test_resolve_unknown_model() {
        assert!(matches!(
            resolve_model("word2vec"),
            Err(EmbeddingError::Model(_))
        ));
    }
}
