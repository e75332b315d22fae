// src/retrieval/mod.rs
// Query-time retrieval: enhancement fan-out, multi-path search, fusion,
// reranking, graph expansion, context assembly
//
// No search path's failure aborts the others; each degrades to an empty
// contribution and fusion proceeds with whatever survived.

pub mod context;
pub mod enhancer;
pub mod fusion;
pub mod graph;
pub mod options;
pub mod rerank;

pub use enhancer::{EnhancedQuery, QueryEnhancer};
pub use options::{RetrievalOptions, SourceWeights};
pub use rerank::{Reranker, RerankedDocument};

use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::store::{MetadataStore, SymbolGraphStore, VectorStore};
use crate::types::{Chunk, FusedScoredChunk, GraphExpansion, ScoredChunk, SearchSource};
use std::sync::Arc;

/// Candidates fetched per search path, as a multiple of top_k
const CANDIDATE_FACTOR: usize = 3;

/// Ranked retrieval response.
pub struct RetrievalResponse {
    pub chunks: Vec<FusedScoredChunk>,
    pub symbol_expansion: Option<GraphExpansion>,
    pub text_view: String,
}

/// The query-time engine.
pub struct RetrievalService {
    store: MetadataStore,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn SymbolGraphStore>,
    embeddings: Option<EmbeddingClient>,
    enhancer: Option<Arc<dyn QueryEnhancer>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl RetrievalService {
    pub fn new(
        store: MetadataStore,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn SymbolGraphStore>,
    ) -> Self {
        Self {
            store,
            vectors,
            graph,
            embeddings: None,
            enhancer: None,
            reranker: None,
        }
    }

    pub fn with_embeddings(mut self, embeddings: EmbeddingClient) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn QueryEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Run the full retrieval pipeline for one query.
    pub async fn search(
        &self,
        query: &str,
        options: RetrievalOptions,
    ) -> Result<RetrievalResponse> {
        let options = options.normalized();
        let candidate_limit = options.top_k * CANDIDATE_FACTOR;

        // Enhancement fan-out; failure degrades to the raw query.
        let primary_languages = self.store.get_primary_languages().await.unwrap_or_default();
        let enhanced = match &self.enhancer {
            Some(enhancer) => match enhancer.enhance(query, &primary_languages).await {
                Ok(enhanced) => enhanced,
                Err(e) => {
                    tracing::warn!("Query enhancement failed ({}), using raw query", e);
                    EnhancedQuery {
                        is_test_related: enhancer::is_test_query(query),
                        ..Default::default()
                    }
                }
            },
            None => EnhancedQuery {
                is_test_related: enhancer::is_test_query(query),
                ..Default::default()
            },
        };

        // Multi-path search: full-text, dense, recency, concurrently.
        let (fts_lists, vector_lists, recent_list) = tokio::join!(
            self.fts_paths(query, &enhanced.bm25_queries, candidate_limit),
            self.vector_paths(query, &enhanced.vector_queries, candidate_limit),
            self.recent_path(options.top_k),
        );

        let mut lists = fts_lists;
        lists.extend(vector_lists);
        lists.push(recent_list);

        // Fusion, heuristics, shortlist.
        let fused = fusion::fuse(lists, &options.weights);
        let fused = fusion::apply_heuristics(fused, &options, enhanced.is_test_related);
        let mut top: Vec<FusedScoredChunk> = fused.into_iter().take(options.top_k).collect();

        // Optional reranking: a failing reranker never fails the query.
        if options.enable_rerank && let Some(reranker) = &self.reranker {
            top = rerank::rerank_with_timeout(
                reranker.as_ref(),
                query,
                top,
                rerank::RERANK_TIMEOUT,
            )
            .await;
        }

        // Graph expansion, strictly below the primaries.
        let mut symbol_expansion = None;
        let mut chunks = top;
        if options.enable_graph {
            match graph::expand_results(self.graph.as_ref(), &self.store, &chunks, &options).await
            {
                Ok((expanded, expansion)) => {
                    chunks.extend(expanded);
                    symbol_expansion = Some(expansion);
                }
                Err(e) => {
                    tracing::warn!("Graph expansion failed ({}), returning primaries only", e);
                }
            }
        }

        let text_view = context::assemble_text_view(&chunks, options.max_tokens);
        Ok(RetrievalResponse {
            chunks,
            symbol_expansion,
            text_view,
        })
    }

    /// Full-text paths: the raw query plus every bm25 rewrite, concurrently.
    async fn fts_paths(
        &self,
        query: &str,
        rewrites: &[String],
        limit: usize,
    ) -> Vec<Vec<ScoredChunk>> {
        let mut queries = vec![query.to_string()];
        queries.extend(rewrites.iter().cloned());

        let searches = queries.iter().map(|q| {
            let store = self.store.clone();
            let q = q.clone();
            async move {
                match store.search_fts(&q, limit).await {
                    Ok(hits) => rank_list(hits, SearchSource::Bm25),
                    Err(e) => {
                        tracing::warn!("FTS path failed ({}), contributing nothing", e);
                        Vec::new()
                    }
                }
            }
        });
        futures::future::join_all(searches).await
    }

    /// Dense paths: the raw query (tagged vector) plus every enhancer rewrite
    /// (tagged hyde), concurrently. Without an embedding client the dense
    /// paths contribute nothing.
    async fn vector_paths(
        &self,
        query: &str,
        rewrites: &[String],
        limit: usize,
    ) -> Vec<Vec<ScoredChunk>> {
        let Some(client) = &self.embeddings else {
            return Vec::new();
        };

        let mut queries = vec![(query.to_string(), SearchSource::Vector)];
        queries.extend(rewrites.iter().map(|q| (q.clone(), SearchSource::Hyde)));

        let searches = queries.into_iter().map(|(q, source)| {
            let client = client.clone();
            async move {
                match self.vector_search_one(&client, &q, source, limit).await {
                    Ok(list) => list,
                    Err(e) => {
                        tracing::warn!("Vector path failed ({}), contributing nothing", e);
                        Vec::new()
                    }
                }
            }
        });
        futures::future::join_all(searches).await
    }

    async fn vector_search_one(
        &self,
        client: &EmbeddingClient,
        query: &str,
        source: SearchSource,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let embedding = client.embed_one(query).await?;
        let hits = self.vectors.query(embedding, limit).await?;
        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        // Chunks come back in hit order; stale vector ids with no chunk row
        // are skipped, so scores are matched by id rather than position.
        let score_by_id: std::collections::HashMap<String, f32> = hits.into_iter().collect();
        let chunks = self.store.get_chunks_by_ids(ids).await?;
        let scored: Vec<(Chunk, f32)> = chunks
            .into_iter()
            .filter_map(|chunk| {
                score_by_id
                    .get(chunk.id.as_str())
                    .map(|score| (chunk, *score))
            })
            .collect();
        Ok(rank_list(scored, source))
    }

    /// Recency path: first chunk of the most-recently-modified files.
    async fn recent_path(&self, limit: usize) -> Vec<ScoredChunk> {
        match self.store.get_recent_chunks(limit).await {
            Ok(hits) => rank_list(hits, SearchSource::Recent),
            Err(e) => {
                tracing::warn!("Recency path failed ({}), contributing nothing", e);
                Vec::new()
            }
        }
    }
}

/// Attach 1-based ranks to an ordered hit list.
fn rank_list(hits: Vec<(Chunk, f32)>, source: SearchSource) -> Vec<ScoredChunk> {
    hits.into_iter()
        .enumerate()
        .map(|(i, (chunk, score))| ScoredChunk {
            chunk,
            score,
            rank: i + 1,
            source,
        })
        .collect()
}
