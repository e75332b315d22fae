// src/embeddings/openai.rs
// OpenAI embeddings API client (text-embedding-3-small)

use super::EmbeddingProvider;
use crate::error::{QuarryError, Result};
use crate::utils::truncate;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// API endpoint for OpenAI embeddings
const API_URL: &str = "https://api.openai.com/v1/embeddings";

/// Max input tokens (OpenAI limit for embedding models)
const MAX_INPUT_TOKENS: usize = 8192;

/// Approximate chars per token (conservative estimate)
const CHARS_PER_TOKEN: usize = 4;

/// Max characters to embed (based on token limit)
const MAX_TEXT_CHARS: usize = MAX_INPUT_TOKENS * CHARS_PER_TOKEN;

/// Max texts per batch request (OpenAI allows up to 2048 inputs,
/// but we cap lower to stay well within the total token limit)
const MAX_BATCH_SIZE: usize = 256;

/// Retry attempts
const RETRY_ATTEMPTS: usize = 2;

/// OpenAI embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenAiEmbeddingModel {
    /// text-embedding-3-small: 1536 default dims
    #[default]
    TextEmbedding3Small,
    /// text-embedding-3-large: 3072 default dims
    TextEmbedding3Large,
}

impl OpenAiEmbeddingModel {
    /// Get the model name for API calls
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::TextEmbedding3Small => "text-embedding-3-small",
            Self::TextEmbedding3Large => "text-embedding-3-large",
        }
    }

    /// Get default embedding dimensions for this model
    pub fn default_dimensions(&self) -> usize {
        match self {
            Self::TextEmbedding3Small => 1536,
            Self::TextEmbedding3Large => 3072,
        }
    }

    /// Parse from model name string
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "text-embedding-3-small" => Some(Self::TextEmbedding3Small),
            "text-embedding-3-large" => Some(Self::TextEmbedding3Large),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpenAiEmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.model_name())
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// OpenAI embeddings client
pub struct OpenAiEmbeddings {
    api_key: String,
    model: OpenAiEmbeddingModel,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl OpenAiEmbeddings {
    /// Create new OpenAI embeddings client with default settings
    pub fn new(api_key: String) -> Self {
        Self::with_config(api_key, OpenAiEmbeddingModel::default(), None)
    }

    /// Create embeddings client with full configuration
    pub fn with_config(
        api_key: String,
        model: OpenAiEmbeddingModel,
        dimensions: Option<usize>,
    ) -> Self {
        let dimensions = dimensions.unwrap_or_else(|| model.default_dimensions());
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            model,
            dimensions,
            http_client,
        }
    }

    /// Get the model being used
    pub fn model(&self) -> OpenAiEmbeddingModel {
        self.model
    }

    /// Core embedding call — handles single and batch via the same endpoint
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Truncate texts that exceed the limit
        let inputs: Vec<String> = texts
            .iter()
            .map(|t| {
                if t.len() > MAX_TEXT_CHARS {
                    debug!("Truncating text from {} to {} chars", t.len(), MAX_TEXT_CHARS);
                    truncate(t, MAX_TEXT_CHARS)
                } else {
                    t.clone()
                }
            })
            .collect();

        let body = serde_json::json!({
            "input": inputs,
            "model": self.model.model_name(),
            "dimensions": self.dimensions,
            "encoding_format": "float"
        });

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }

            match self
                .http_client
                .post(API_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        let resp: EmbeddingResponse = response.json().await?;

                        // Sort by index to ensure correct ordering
                        let mut data = resp.data;
                        data.sort_by_key(|d| d.index);

                        let embeddings: Vec<Vec<f32>> =
                            data.into_iter().map(|d| d.embedding).collect();

                        // Validate dimensions on first result
                        if let Some(first) = embeddings.first()
                            && first.len() != self.dimensions
                        {
                            return Err(QuarryError::Embedding(format!(
                                "dimension mismatch: expected {}, got {}",
                                self.dimensions,
                                first.len()
                            )));
                        }

                        return Ok(embeddings);
                    } else {
                        let status = response.status();
                        let error_text = response.text().await.unwrap_or_default();

                        // Try to parse structured error
                        let msg = serde_json::from_str::<ErrorResponse>(&error_text)
                            .map(|e| e.error.message)
                            .unwrap_or(error_text);

                        last_error = Some(QuarryError::Embedding(format!(
                            "OpenAI API error {}: {}",
                            status, msg
                        )));
                    }
                }
                Err(e) => {
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| QuarryError::Embedding("unknown embedding failure".into())))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // For large batches, chunk to stay within limits
        if texts.len() <= MAX_BATCH_SIZE {
            return self.embed_texts(texts).await;
        }

        let chunks: Vec<&[String]> = texts.chunks(MAX_BATCH_SIZE).collect();
        debug!(
            "Embedding {} texts in {} parallel batches",
            texts.len(),
            chunks.len()
        );

        let futures: Vec<_> = chunks
            .into_iter()
            .map(|chunk| self.embed_texts(chunk))
            .collect();

        let results = futures::future::join_all(futures).await;

        let mut all_results = Vec::with_capacity(texts.len());
        for result in results {
            all_results.extend(result?);
        }

        Ok(all_results)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> String {
        format!("{}@{}", self.model.model_name(), self.dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dimensions() {
        let model = OpenAiEmbeddingModel::TextEmbedding3Small;
        assert_eq!(model.default_dimensions(), 1536);
        assert_eq!(model.model_name(), "text-embedding-3-small");
    }

    #[test]
    fn test_model_from_name() {
        assert_eq!(
            OpenAiEmbeddingModel::from_name("text-embedding-3-small"),
            Some(OpenAiEmbeddingModel::TextEmbedding3Small)
        );
        assert_eq!(
            OpenAiEmbeddingModel::from_name("text-embedding-3-large"),
            Some(OpenAiEmbeddingModel::TextEmbedding3Large)
        );
        assert_eq!(OpenAiEmbeddingModel::from_name("unknown"), None);
    }

    #[test]
    fn test_dimension_override() {
        let client =
            OpenAiEmbeddings::with_config("key".into(), OpenAiEmbeddingModel::default(), Some(768));
        assert_eq!(client.dimensions(), 768);
        assert_eq!(client.model_id(), "text-embedding-3-small@768");
    }

    #[test]
    fn test_max_text_chars() {
        // 8192 tokens * 4 chars/token = 32768 chars
        assert_eq!(MAX_TEXT_CHARS, 32768);
    }
}
