// tests/build_pipeline.rs
// End-to-end: build a real fixture repository, search it, drift it, update it

use async_trait::async_trait;
use quarry::build::{IndexService, IndexServiceConfig, WorkerEvent};
use quarry::chunker::LineChunker;
use quarry::embeddings::{EmbeddingClient, EmbeddingProvider};
use quarry::retrieval::{RetrievalOptions, RetrievalService};
use quarry::store::{MetadataStore, SqliteSymbolGraph, SqliteVectorStore};
use quarry::types::{IndexStatus, SearchSource};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Deterministic embedding provider so dense search works offline.
struct HashEmbeddings;

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    async fn embed(&self, texts: &[String]) -> quarry::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 1536];
                for (i, b) in t.bytes().enumerate() {
                    v[(i * 31 + b as usize) % 1536] += 1.0;
                }
                v
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        1536
    }

    fn model_id(&self) -> String {
        "hash-embeddings".to_string()
    }
}

fn write_fixture(root: &Path) {
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(
        root.join("src/auth.rs"),
        "pub fn verify_session_token(token: &str) -> bool {\n    !token.is_empty()\n}\n",
    )
    .unwrap();
    std::fs::write(
        root.join("src/pool.rs"),
        "pub fn acquire_connection_pool() {\n    configure_wal_mode();\n}\n\nfn configure_wal_mode() {}\n",
    )
    .unwrap();
    std::fs::write(
        root.join("src/legacy.rs"),
        "pub fn obsolete_entry_point() {}\n",
    )
    .unwrap();
}

async fn build_service(root: &Path) -> (IndexService, MetadataStore) {
    let store = MetadataStore::open_in_memory().await.unwrap();
    let vectors = Arc::new(SqliteVectorStore::new(store.pool()));
    let embeddings = EmbeddingClient::new(Arc::new(HashEmbeddings));
    let service = IndexService::new(
        root.to_path_buf(),
        store.clone(),
        Arc::new(LineChunker::default()),
        Some(embeddings),
        vectors,
        IndexServiceConfig {
            poll_interval: Duration::from_secs(300),
            recovery_backoff: Duration::from_millis(50),
            max_recovery_attempts: 3,
        },
    )
    .await;
    (service, store)
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<WorkerEvent>,
    pred: impl Fn(&WorkerEvent) -> bool,
) {
    timeout(Duration::from_secs(15), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event");
}

#[tokio::test(flavor = "multi_thread")]
async fn full_build_then_hybrid_search() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let (service, store) = build_service(dir.path()).await;
    let mut events = service.subscribe();
    service.start_build().await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, WorkerEvent::BuildComplete)).await;

    let status = store.get_index_status().await.unwrap();
    assert_eq!(status.status, IndexStatus::Done);
    assert!(store.get_checkpoint().await.unwrap().is_none());

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.files, 3);
    assert!(stats.chunks >= 3);
    assert!(stats.cached_embeddings >= 3);

    // Hybrid retrieval over the fresh index
    let vectors = Arc::new(SqliteVectorStore::new(store.pool()));
    let graph = Arc::new(SqliteSymbolGraph::new(store.pool()));
    let retrieval = RetrievalService::new(store.clone(), vectors, graph)
        .with_embeddings(EmbeddingClient::new(Arc::new(HashEmbeddings)));

    let response = retrieval
        .search("verify_session_token", RetrievalOptions::default())
        .await
        .unwrap();
    assert!(!response.chunks.is_empty());
    assert_eq!(response.chunks[0].chunk.file_path, "src/auth.rs");
    assert!(response.chunks[0].sources.contains(&SearchSource::Bm25));
    assert!(response.text_view.contains("src/auth.rs"));

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn drift_poll_applies_incremental_update() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let (service, store) = build_service(dir.path()).await;
    let mut events = service.subscribe();
    service.start_build().await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, WorkerEvent::BuildComplete)).await;

    // Drift: rewrite one file, remove another, add a third
    std::fs::write(
        dir.path().join("src/auth.rs"),
        "pub fn verify_session_token(token: &str) -> bool {\n    rotate_signing_keys();\n    !token.is_empty()\n}\n\nfn rotate_signing_keys() {}\n",
    )
    .unwrap();
    std::fs::remove_file(dir.path().join("src/legacy.rs")).unwrap();
    std::fs::write(
        dir.path().join("src/metrics.rs"),
        "pub fn emit_histogram_bucket() {}\n",
    )
    .unwrap();

    assert!(service.poll_once().await.unwrap());
    wait_for_event(&mut events, |e| matches!(e, WorkerEvent::UpdateComplete)).await;

    // Deleted file is fully gone, including from full-text search
    assert!(store.get_file_meta("src/legacy.rs").await.unwrap().is_none());
    assert!(
        store
            .search_fts("obsolete_entry_point", 10)
            .await
            .unwrap()
            .is_empty()
    );

    // New and rewritten content is searchable
    assert_eq!(store.search_fts("emit_histogram_bucket", 10).await.unwrap().len(), 1);
    assert_eq!(store.search_fts("rotate_signing_keys", 10).await.unwrap().len(), 1);

    // Quiescent again
    assert!(!service.poll_once().await.unwrap());

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_rebuild_short_circuits() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let (service, store) = build_service(dir.path()).await;
    let mut events = service.subscribe();
    service.start_build().await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, WorkerEvent::BuildComplete)).await;

    let before = store.get_stats().await.unwrap();

    service.start_build().await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, WorkerEvent::BuildComplete)).await;

    let after = store.get_stats().await.unwrap();
    assert_eq!(before.files, after.files);
    assert_eq!(before.chunks, after.chunks);
    assert_eq!(before.cached_embeddings, after.cached_embeddings);

    service.shutdown().await;
}
