// src/store/mod.rs
// Persistent per-project metadata store
//
// One SQLite database per project, located under a directory keyed by a
// stable hash of the absolute project path, so two checkouts of the same
// repo at different paths get independent indexes.

mod cache;
mod chunks;
mod files;
pub mod graph;
pub mod pool;
pub mod schema;
mod status;
pub mod vector;

pub use cache::{bytes_to_embedding, embedding_cache_key, embedding_to_bytes};
pub use chunks::sanitize_fts_query;
pub use graph::{SqliteSymbolGraph, SymbolGraphStore};
pub use pool::DatabasePool;
pub use vector::{SqliteVectorStore, VectorStore, distance_to_score};

use crate::error::Result;
use crate::types::{
    BuildCheckpoint, Chunk, FileMetadata, IndexingProgress, StoreStats,
};
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Minimum share of files a language must cover to count as primary
const PRIMARY_LANGUAGE_MIN_SHARE: f64 = 0.2;

/// Maximum number of primary languages reported
const PRIMARY_LANGUAGE_CAP: usize = 5;

/// Stable 16-hex-char key for a project's absolute path.
pub fn project_key(project_path: &Path) -> String {
    let absolute = project_path
        .canonicalize()
        .unwrap_or_else(|_| project_path.to_path_buf());
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// Directory holding a project's index database.
pub fn project_data_dir(project_path: &Path) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quarry")
        .join("projects")
        .join(project_key(project_path))
}

/// Async facade over the per-project index database.
///
/// Cheap to clone; all methods hop onto the pool's blocking executor.
#[derive(Clone)]
pub struct MetadataStore {
    pool: Arc<DatabasePool>,
}

impl MetadataStore {
    /// Open (or create) the store for a project.
    pub async fn open(project_path: &Path) -> Result<Self> {
        let db_path = project_data_dir(project_path).join("index.db");
        let pool = DatabasePool::open(&db_path)
            .await
            .context("Failed to open index database")?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Open an in-memory store (for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let pool = DatabasePool::open_in_memory()
            .await
            .context("Failed to open in-memory index database")?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Shared pool handle, for stores layered on the same database
    /// (vector table, symbol graph).
    pub fn pool(&self) -> Arc<DatabasePool> {
        self.pool.clone()
    }

    // ------------------------------------------------------------------
    // File metadata
    // ------------------------------------------------------------------

    /// Upsert file metadata by path.
    pub async fn insert_file_meta(&self, files: Vec<FileMetadata>) -> Result<()> {
        self.pool
            .run(move |conn| files::insert_file_meta_sync(conn, &files))
            .await
    }

    pub async fn get_file_meta(&self, path: &str) -> Result<Option<FileMetadata>> {
        let path = path.to_string();
        self.pool
            .run(move |conn| files::get_file_meta_sync(conn, &path))
            .await
    }

    pub async fn get_all_file_meta(&self) -> Result<Vec<FileMetadata>> {
        self.pool.run(files::get_all_file_meta_sync).await
    }

    /// Delete file metadata; cascades to chunks, FTS entries, and vectors.
    pub async fn delete_file_meta(&self, paths: Vec<String>) -> Result<()> {
        self.pool
            .run(move |conn| files::delete_file_meta_sync(conn, &paths))
            .await
    }

    /// Languages covering at least ~20% of files, most common first, max 5.
    pub async fn get_primary_languages(&self) -> Result<Vec<String>> {
        self.pool
            .run(|conn| {
                files::primary_languages_sync(conn, PRIMARY_LANGUAGE_MIN_SHARE, PRIMARY_LANGUAGE_CAP)
            })
            .await
    }

    // ------------------------------------------------------------------
    // Chunks + full-text search
    // ------------------------------------------------------------------

    /// Bulk insert-or-replace chunks, batched internally, FTS kept in
    /// lock-step. Returns the number of chunks stored.
    pub async fn insert_chunks(&self, chunks: Vec<Chunk>) -> Result<usize> {
        self.pool
            .run(move |conn| chunks::insert_chunks_sync(conn, &chunks))
            .await
    }

    pub async fn get_chunks_by_file_path(&self, path: &str) -> Result<Vec<Chunk>> {
        let path = path.to_string();
        self.pool
            .run(move |conn| chunks::get_chunks_by_file_path_sync(conn, &path))
            .await
    }

    pub async fn delete_chunks_by_file_path(&self, paths: Vec<String>) -> Result<()> {
        self.pool
            .run(move |conn| chunks::delete_chunks_by_file_path_sync(conn, &paths))
            .await
    }

    pub async fn get_chunks_by_ids(&self, ids: Vec<String>) -> Result<Vec<Chunk>> {
        self.pool
            .run(move |conn| chunks::get_chunks_by_ids_sync(conn, &ids))
            .await
    }

    /// First chunk of each of the N most-recently-modified files with a
    /// monotonically decreasing synthetic recency score.
    pub async fn get_recent_chunks(&self, limit: usize) -> Result<Vec<(Chunk, f32)>> {
        self.pool
            .run(move |conn| chunks::get_recent_chunks_sync(conn, limit))
            .await
    }

    /// BM25-ranked full-text search. Empty/invalid queries yield no results.
    pub async fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<(Chunk, f32)>> {
        let query = query.to_string();
        self.pool
            .run(move |conn| chunks::search_fts_sync(conn, &query, limit))
            .await
    }

    // ------------------------------------------------------------------
    // Embedding cache
    // ------------------------------------------------------------------

    pub async fn get_embedding_cache(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let key = key.to_string();
        self.pool
            .run(move |conn| cache::get_embedding_cache_sync(conn, &key))
            .await
    }

    pub async fn set_embedding_cache(&self, key: &str, embedding: Vec<f32>) -> Result<()> {
        let key = key.to_string();
        self.pool
            .run(move |conn| cache::set_embedding_cache_sync(conn, &key, &embedding))
            .await
    }

    // ------------------------------------------------------------------
    // Singletons: progress + checkpoint
    // ------------------------------------------------------------------

    pub async fn get_index_status(&self) -> Result<IndexingProgress> {
        self.pool.run(status::get_index_status_sync).await
    }

    pub async fn update_index_status(&self, progress: IndexingProgress) -> Result<()> {
        // Progress writes race build writes; retry through contention.
        self.pool
            .interact_with_retry(move |conn| {
                status::update_index_status_sync(conn, &progress).map_err(Into::into)
            })
            .await
            .map_err(Into::into)
    }

    pub async fn get_checkpoint(&self) -> Result<Option<BuildCheckpoint>> {
        self.pool.run(status::get_checkpoint_sync).await
    }

    pub async fn save_checkpoint(&self, checkpoint: BuildCheckpoint) -> Result<()> {
        self.pool
            .interact_with_retry(move |conn| {
                status::save_checkpoint_sync(conn, &checkpoint).map_err(Into::into)
            })
            .await
            .map_err(Into::into)
    }

    pub async fn clear_checkpoint(&self) -> Result<()> {
        self.pool.run(status::clear_checkpoint_sync).await
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub async fn get_stats(&self) -> Result<StoreStats> {
        self.pool
            .run(|conn| {
                Ok::<_, rusqlite::Error>(StoreStats {
                    files: files::count_files_sync(conn) as u64,
                    chunks: chunks::count_chunks_sync(conn) as u64,
                    cached_embeddings: cache::count_cached_embeddings_sync(conn) as u64,
                })
            })
            .await
    }
}
