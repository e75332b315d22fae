// src/store/graph.rs
// Symbol/dependency graph store
//
// External narrow interface: edge production belongs to the symbol chunker;
// this store persists edges and answers bounded expansions from seed chunks.

use crate::error::Result;
use crate::store::pool::DatabasePool;
use crate::types::{GraphEdge, GraphExpansion};
use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::collections::HashSet;
use std::sync::Arc;

/// Contract for a symbol/dependency graph store.
#[async_trait]
pub trait SymbolGraphStore: Send + Sync {
    /// Persist edges (duplicates ignored).
    async fn insert_edges(&self, edges: Vec<GraphEdge>) -> Result<()>;

    /// Breadth-first expansion from seed chunks, bounded by depth and total
    /// node count. Seeds themselves are not part of the result.
    async fn expand_from_chunks(
        &self,
        seed_ids: Vec<String>,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<GraphExpansion>;

    /// Remove all edges touching the given chunk ids.
    async fn delete_edges_for_chunks(&self, chunk_ids: Vec<String>) -> Result<()>;
}

/// SQLite-backed graph store sharing the project database.
pub struct SqliteSymbolGraph {
    pool: Arc<DatabasePool>,
}

impl SqliteSymbolGraph {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

/// Edges adjacent to a chunk, in both directions.
fn neighbors_sync(conn: &Connection, chunk_id: &str) -> rusqlite::Result<Vec<GraphEdge>> {
    let mut stmt = conn.prepare_cached(
        "SELECT from_chunk_id, to_chunk_id, relation FROM chunk_edges
         WHERE from_chunk_id = ?1 OR to_chunk_id = ?1",
    )?;
    let rows = stmt.query_map([chunk_id], |row| {
        Ok(GraphEdge {
            from_chunk_id: row.get(0)?,
            to_chunk_id: row.get(1)?,
            relation: row.get(2)?,
        })
    })?;
    rows.collect()
}

fn expand_sync(
    conn: &Connection,
    seed_ids: &[String],
    max_depth: usize,
    max_nodes: usize,
) -> rusqlite::Result<GraphExpansion> {
    let mut visited: HashSet<String> = seed_ids.iter().cloned().collect();
    let mut frontier: Vec<String> = seed_ids.to_vec();
    let mut expansion = GraphExpansion::default();
    let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();

    for _ in 0..max_depth {
        if frontier.is_empty() || expansion.related_chunk_ids.len() >= max_nodes {
            break;
        }
        let mut next_frontier = Vec::new();
        for chunk_id in &frontier {
            for edge in neighbors_sync(conn, chunk_id)? {
                let other = if edge.from_chunk_id == *chunk_id {
                    edge.to_chunk_id.clone()
                } else {
                    edge.from_chunk_id.clone()
                };

                let key = (
                    edge.from_chunk_id.clone(),
                    edge.to_chunk_id.clone(),
                    edge.relation.clone(),
                );
                if seen_edges.insert(key) {
                    expansion.edges.push(edge);
                }

                if visited.insert(other.clone()) {
                    expansion.related_chunk_ids.push(other.clone());
                    next_frontier.push(other);
                    if expansion.related_chunk_ids.len() >= max_nodes {
                        return Ok(expansion);
                    }
                }
            }
        }
        frontier = next_frontier;
    }

    Ok(expansion)
}

#[async_trait]
impl SymbolGraphStore for SqliteSymbolGraph {
    async fn insert_edges(&self, edges: Vec<GraphEdge>) -> Result<()> {
        self.pool
            .run(move |conn| {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT OR IGNORE INTO chunk_edges (from_chunk_id, to_chunk_id, relation)
                         VALUES (?, ?, ?)",
                    )?;
                    for edge in &edges {
                        stmt.execute(params![
                            edge.from_chunk_id,
                            edge.to_chunk_id,
                            edge.relation
                        ])?;
                    }
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
    }

    async fn expand_from_chunks(
        &self,
        seed_ids: Vec<String>,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<GraphExpansion> {
        self.pool
            .run(move |conn| expand_sync(conn, &seed_ids, max_depth, max_nodes))
            .await
    }

    async fn delete_edges_for_chunks(&self, chunk_ids: Vec<String>) -> Result<()> {
        self.pool
            .run(move |conn| {
                let tx = conn.unchecked_transaction()?;
                for id in &chunk_ids {
                    tx.execute(
                        "DELETE FROM chunk_edges WHERE from_chunk_id = ?1 OR to_chunk_id = ?1",
                        params![id],
                    )?;
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
    }
}
