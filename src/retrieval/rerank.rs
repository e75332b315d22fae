// src/retrieval/rerank.rs
// Optional reranking of the fused shortlist
//
// The reranker is an external service; it gets a bounded timeout and any
// failure keeps the fused order untouched.

use crate::error::{QuarryError, Result};
use crate::types::FusedScoredChunk;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Default reranker timeout
pub const RERANK_TIMEOUT: Duration = Duration::from_secs(10);

/// One reranked document: index into the submitted list plus a relevance
/// score (higher is better).
#[derive(Debug, Clone, Deserialize)]
pub struct RerankedDocument {
    pub index: usize,
    pub relevance_score: f32,
}

/// External reranker contract: `rerank(query, documents) -> scored documents`.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankedDocument>>;
}

/// HTTP reranker client (Cohere/Jina-style rerank endpoint).
pub struct HttpReranker {
    endpoint: String,
    api_key: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankedDocument>,
}

impl HttpReranker {
    pub fn new(endpoint: String, api_key: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(RERANK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint,
            api_key,
            http_client,
        }
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankedDocument>> {
        let body = serde_json::json!({
            "query": query,
            "documents": documents,
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(QuarryError::Other(format!(
                "reranker error {}: {}",
                status, text
            )));
        }

        let parsed: RerankResponse = response.json().await?;
        Ok(parsed.results)
    }
}

/// Reorder the fused shortlist by reranker scores, under a timeout.
///
/// Degrades to the input order on timeout, transport error, or a malformed
/// response; indices outside the submitted list are ignored and unscored
/// documents keep their relative fused order after the scored ones.
pub async fn rerank_with_timeout(
    reranker: &dyn Reranker,
    query: &str,
    fused: Vec<FusedScoredChunk>,
    timeout: Duration,
) -> Vec<FusedScoredChunk> {
    if fused.len() < 2 {
        return fused;
    }

    let documents: Vec<String> = fused.iter().map(|f| f.chunk.content.clone()).collect();
    let outcome = tokio::time::timeout(timeout, reranker.rerank(query, &documents)).await;

    let scored = match outcome {
        Ok(Ok(scored)) => scored,
        Ok(Err(e)) => {
            tracing::warn!("Reranker failed ({}), keeping fused order", e);
            return fused;
        }
        Err(_) => {
            tracing::warn!("Reranker timed out after {:?}, keeping fused order", timeout);
            return fused;
        }
    };

    let mut order: Vec<(usize, f32)> = scored
        .into_iter()
        .filter(|doc| doc.index < fused.len())
        .map(|doc| (doc.index, doc.relevance_score))
        .collect();
    order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut picked = vec![false; fused.len()];
    let mut reordered = Vec::with_capacity(fused.len());
    for (index, _) in order {
        if !picked[index] {
            picked[index] = true;
            reordered.push(fused[index].clone());
        }
    }
    for (index, item) in fused.into_iter().enumerate() {
        if !picked[index] {
            reordered.push(item);
        }
    }
    reordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkKind, SearchSource};
    use std::collections::HashMap;

    fn fused(id: &str, score: f32) -> FusedScoredChunk {
        FusedScoredChunk {
            chunk: Chunk {
                id: id.to_string(),
                file_path: format!("src/{id}.rs"),
                content: format!("content {id}"),
                start_line: 1,
                end_line: 5,
                index: 0,
                content_hash: format!("h-{id}"),
                kind: ChunkKind::Block,
                metadata: HashMap::new(),
            },
            fused_score: score,
            sources: [SearchSource::Bm25].into_iter().collect(),
        }
    }

    struct ReversingReranker;

    #[async_trait]
    impl Reranker for ReversingReranker {
        async fn rerank(&self, _q: &str, documents: &[String]) -> Result<Vec<RerankedDocument>> {
            Ok(documents
                .iter()
                .enumerate()
                .map(|(i, _)| RerankedDocument {
                    index: i,
                    relevance_score: i as f32,
                })
                .collect())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn rerank(&self, _q: &str, _d: &[String]) -> Result<Vec<RerankedDocument>> {
            Err(QuarryError::Other("rerank backend down".into()))
        }
    }

    struct HangingReranker;

    #[async_trait]
    impl Reranker for HangingReranker {
        async fn rerank(&self, _q: &str, _d: &[String]) -> Result<Vec<RerankedDocument>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_rerank_reorders() {
        let input = vec![fused("a", 0.9), fused("b", 0.5), fused("c", 0.1)];
        let result =
            rerank_with_timeout(&ReversingReranker, "q", input, Duration::from_secs(1)).await;
        let ids: Vec<_> = result.iter().map(|f| f.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_order() {
        let input = vec![fused("a", 0.9), fused("b", 0.5)];
        let result =
            rerank_with_timeout(&FailingReranker, "q", input, Duration::from_secs(1)).await;
        let ids: Vec<_> = result.iter().map(|f| f.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerank_timeout_keeps_order() {
        let input = vec![fused("a", 0.9), fused("b", 0.5)];
        let result =
            rerank_with_timeout(&HangingReranker, "q", input, Duration::from_millis(100)).await;
        let ids: Vec<_> = result.iter().map(|f| f.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_single_result_skips_rerank() {
        let input = vec![fused("a", 0.9)];
        let result =
            rerank_with_timeout(&FailingReranker, "q", input, Duration::from_secs(1)).await;
        assert_eq!(result.len(), 1);
    }
}
