// src/store/vector.rs
// Dense-vector similarity store
//
// External narrow interface: the retrieval pipeline only needs query(), the
// build worker only needs insert/delete. The default implementation backs
// onto the project database's sqlite-vec table.

use crate::error::Result;
use crate::store::cache::embedding_to_bytes;
use crate::store::pool::DatabasePool;
use async_trait::async_trait;
use rusqlite::params;
use std::sync::Arc;

/// Contract for a dense-vector similarity store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert (or replace) vectors keyed by chunk id.
    async fn insert(&self, entries: Vec<(String, Vec<f32>)>) -> Result<()>;

    /// Nearest neighbors by cosine distance; returns (chunk_id, score) with
    /// higher scores better.
    async fn query(&self, vector: Vec<f32>, top_k: usize) -> Result<Vec<(String, f32)>>;

    /// Remove vectors for the given chunk ids.
    async fn delete_by_chunk_ids(&self, chunk_ids: Vec<String>) -> Result<()>;
}

/// Convert a cosine distance (0 = identical) to a similarity score in [0, 1].
pub fn distance_to_score(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// sqlite-vec backed vector store sharing the project database.
pub struct SqliteVectorStore {
    pool: Arc<DatabasePool>,
}

impl SqliteVectorStore {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, entries: Vec<(String, Vec<f32>)>) -> Result<()> {
        self.pool
            .run(move |conn| {
                let tx = conn.unchecked_transaction()?;
                for (chunk_id, vector) in &entries {
                    // vec0 tables have no ON CONFLICT; delete-then-insert
                    tx.execute(
                        "DELETE FROM vec_chunks WHERE chunk_id = ?",
                        params![chunk_id],
                    )?;
                    tx.execute(
                        "INSERT INTO vec_chunks (embedding, chunk_id) VALUES (?, ?)",
                        params![embedding_to_bytes(vector), chunk_id],
                    )?;
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
    }

    async fn query(&self, vector: Vec<f32>, top_k: usize) -> Result<Vec<(String, f32)>> {
        self.pool
            .run(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT chunk_id, vec_distance_cosine(embedding, ?1) AS distance
                     FROM vec_chunks
                     ORDER BY distance
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(
                    params![embedding_to_bytes(&vector), top_k as i64],
                    |row| {
                        let chunk_id: String = row.get(0)?;
                        let distance: f64 = row.get(1)?;
                        Ok((chunk_id, distance_to_score(distance as f32)))
                    },
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await
    }

    async fn delete_by_chunk_ids(&self, chunk_ids: Vec<String>) -> Result<()> {
        self.pool
            .run(move |conn| {
                let tx = conn.unchecked_transaction()?;
                for id in &chunk_ids {
                    tx.execute("DELETE FROM vec_chunks WHERE chunk_id = ?", params![id])?;
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
    }
}
