// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use tracing::{debug, warn};

/// API keys loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Embedding/enhancer API key (QUARRY_API_KEY or OPENAI_API_KEY)
    pub embedding: Option<String>,
    /// Reranker service API key (QUARRY_RERANK_API_KEY)
    pub rerank: Option<String>,
}

impl ApiKeys {
    /// Load API keys from environment variables (single source of truth)
    pub fn from_env() -> Self {
        let embedding =
            Self::read_key("QUARRY_API_KEY").or_else(|| Self::read_key("OPENAI_API_KEY"));
        let rerank = Self::read_key("QUARRY_RERANK_API_KEY");

        let keys = Self { embedding, rerank };
        keys.log_status();
        keys
    }

    /// Read a single API key from environment, filtering empty values
    fn read_key(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|k| !k.trim().is_empty())
    }

    /// Check if embeddings are available
    pub fn has_embeddings(&self) -> bool {
        self.embedding.is_some()
    }

    /// Check if the reranker is available
    pub fn has_rerank(&self) -> bool {
        self.rerank.is_some()
    }

    /// Log which API keys are available (without exposing values)
    fn log_status(&self) {
        let mut available = Vec::new();
        if self.embedding.is_some() {
            available.push("embeddings");
        }
        if self.rerank.is_some() {
            available.push("rerank");
        }

        if available.is_empty() {
            warn!("No API keys configured - dense search and reranking will be unavailable");
        } else {
            debug!(keys = ?available, "API keys loaded");
        }
    }
}

/// Embeddings configuration from environment variables
#[derive(Debug, Clone, Default)]
pub struct EmbeddingsEnv {
    /// Custom embedding dimensions (QUARRY_EMBEDDING_DIMENSIONS)
    pub dimensions: Option<usize>,
    /// Override embedding model name (QUARRY_EMBEDDING_MODEL)
    pub model: Option<String>,
}

impl EmbeddingsEnv {
    /// Load embeddings configuration from environment variables
    pub fn from_env() -> Self {
        let dimensions = std::env::var("QUARRY_EMBEDDING_DIMENSIONS")
            .ok()
            .and_then(|d| d.parse().ok());

        let model = std::env::var("QUARRY_EMBEDDING_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty());

        if let Some(dims) = dimensions {
            debug!(dimensions = dims, "Custom embedding dimensions configured");
        }

        Self { dimensions, model }
    }
}
