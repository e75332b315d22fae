// src/embeddings/mod.rs
// Embedding provider module

mod openai;

pub use self::openai::{OpenAiEmbeddingModel, OpenAiEmbeddings};

use crate::config::{ApiKeys, EmbeddingsEnv};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Narrow contract the build worker and retrieval pipeline consume:
/// `embed(texts) -> vectors`. The provider's internals (batching, retries,
/// truncation) are its own business.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector width produced by this provider.
    fn dimensions(&self) -> usize;

    /// Model identifier, part of embedding cache keys.
    fn model_id(&self) -> String;
}

/// Embedding client wrapping the configured provider.
#[derive(Clone)]
pub struct EmbeddingClient {
    inner: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { inner: provider }
    }

    /// Create a client from pre-loaded configuration (avoids duplicate env
    /// reads). Returns None when no API key is configured.
    pub fn from_config(api_keys: &ApiKeys, env: &EmbeddingsEnv) -> Option<Self> {
        let api_key = api_keys.embedding.as_ref()?;

        let model = env
            .model
            .as_deref()
            .and_then(OpenAiEmbeddingModel::from_name)
            .unwrap_or_default();

        Some(Self {
            inner: Arc::new(OpenAiEmbeddings::with_config(
                api_key.clone(),
                model,
                env.dimensions,
            )),
        })
    }

    /// Create a client from environment configuration.
    /// Note: prefer from_config() to avoid duplicate env var reads.
    pub fn from_env() -> Option<Self> {
        Self::from_config(&ApiKeys::from_env(), &EmbeddingsEnv::from_env())
    }

    pub fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    pub fn model_id(&self) -> String {
        self.inner.model_id()
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.inner.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::QuarryError::Embedding("empty embedding response".into()))
    }

    /// Embed multiple texts in batch.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed(texts).await
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Deterministic fake provider for tests: hashes each text into a small
    /// fixed-width vector.
    pub struct FakeEmbeddings {
        pub dimensions: usize,
    }

    impl Default for FakeEmbeddings {
        fn default() -> Self {
            Self { dimensions: 8 }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddings {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dimensions];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % self.dimensions] += b as f32 / 255.0;
                    }
                    v
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn model_id(&self) -> String {
            "fake-embeddings".to_string()
        }
    }
}
