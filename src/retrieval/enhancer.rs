// src/retrieval/enhancer.rs
// Query enhancement: external fan-out contract plus a heuristic fallback

use crate::error::Result;
use async_trait::async_trait;

/// Output of query enhancement: keyword-flavored rewrites for the full-text
/// path, hypothetical-document rewrites for the dense path, and whether the
/// query is asking about tests.
#[derive(Debug, Clone, Default)]
pub struct EnhancedQuery {
    pub bm25_queries: Vec<String>,
    pub vector_queries: Vec<String>,
    pub is_test_related: bool,
}

/// External query-enhancer contract (HyDE, multi-query rewriting). Failure
/// degrades to searching with the raw query alone.
#[async_trait]
pub trait QueryEnhancer: Send + Sync {
    async fn enhance(&self, query: &str, primary_languages: &[String]) -> Result<EnhancedQuery>;
}

/// Heuristic test-intent classifier used when no enhancer is configured (and
/// as the degradation path when one fails).
pub fn is_test_query(query: &str) -> bool {
    let q = query.to_lowercase();
    ["test", "spec", "fixture", "mock", "assert", "coverage"]
        .iter()
        .any(|term| q.contains(term))
}

/// Fallback enhancer: no rewrites, heuristic test classification.
pub struct HeuristicEnhancer;

#[async_trait]
impl QueryEnhancer for HeuristicEnhancer {
    async fn enhance(&self, query: &str, _primary_languages: &[String]) -> Result<EnhancedQuery> {
        Ok(EnhancedQuery {
            bm25_queries: Vec::new(),
            vector_queries: Vec::new(),
            is_test_related: is_test_query(query),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_test_query_positive() {
        assert!(is_test_query("how do I test the parser"));
        assert!(is_test_query("where are the fixtures for auth"));
        assert!(is_test_query("unit TEST for fusion"));
    }

    #[test]
    fn test_is_test_query_negative() {
        assert!(!is_test_query("where is the connection pool created"));
        assert!(!is_test_query("http retry logic"));
    }

    #[tokio::test]
    async fn test_heuristic_enhancer_classifies_only() {
        let enhancer = HeuristicEnhancer;
        let enhanced = enhancer.enhance("test the scanner", &[]).await.unwrap();
        assert!(enhanced.bm25_queries.is_empty());
        assert!(enhanced.vector_queries.is_empty());
        assert!(enhanced.is_test_related);
    }
}
