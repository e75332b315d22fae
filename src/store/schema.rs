// src/store/schema.rs
// Schema for the per-project index database
//
// One SQLite file per project holds file metadata, chunks, the FTS5 index,
// the content-addressed embedding cache, the vector table, the symbol graph
// edges, and the two singleton rows (status, checkpoint).

use anyhow::Result;
use rusqlite::Connection;

/// SQL to create the vec_chunks virtual table.
///
/// chunk_size=256 reduces per-chunk pre-allocation waste; sqlite-vec scans
/// brute-force for KNN so the setting doesn't affect query speed at our scale.
pub const VEC_CHUNKS_CREATE_SQL: &str = "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
    embedding float[1536],
    +chunk_id TEXT,
    chunk_size=256
)";

/// Index database schema SQL
pub const SCHEMA: &str = r#"
-- =======================================
-- FILE METADATA
-- =======================================
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    size INTEGER NOT NULL,
    language TEXT
);

-- =======================================
-- CODE CHUNKS (canonical chunk store)
-- =======================================
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'block',
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path, chunk_index);

-- =======================================
-- FULL-TEXT SEARCH (FTS5)
-- =======================================
-- tokenize: unicode61 without porter stemmer, keeping '_' as a token character
-- so snake_case identifiers like database_pool are indexed as single tokens.
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    chunk_id UNINDEXED,
    file_path,
    content,
    tokenize="unicode61 remove_diacritics 1 tokenchars '_'"
);

-- =======================================
-- EMBEDDING CACHE (content-addressed, write-once per key)
-- =======================================
CREATE TABLE IF NOT EXISTS embedding_cache (
    cache_key TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- SYMBOL GRAPH EDGES
-- =======================================
CREATE TABLE IF NOT EXISTS chunk_edges (
    id INTEGER PRIMARY KEY,
    from_chunk_id TEXT NOT NULL,
    to_chunk_id TEXT NOT NULL,
    relation TEXT NOT NULL,
    UNIQUE(from_chunk_id, to_chunk_id, relation)
);
CREATE INDEX IF NOT EXISTS idx_edges_from ON chunk_edges(from_chunk_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON chunk_edges(to_chunk_id);

-- =======================================
-- SINGLETON ROWS (status, checkpoint)
-- =======================================
CREATE TABLE IF NOT EXISTS index_status (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    status TEXT NOT NULL DEFAULT 'idle',
    phase TEXT NOT NULL DEFAULT 'scanning',
    phase_progress REAL NOT NULL DEFAULT 0,
    overall_progress REAL NOT NULL DEFAULT 0,
    scanned_files INTEGER NOT NULL DEFAULT 0,
    total_files INTEGER NOT NULL DEFAULT 0,
    chunked_files INTEGER NOT NULL DEFAULT 0,
    embedded_chunks INTEGER NOT NULL DEFAULT 0,
    total_chunks INTEGER NOT NULL DEFAULT 0,
    stored_chunks INTEGER NOT NULL DEFAULT 0,
    start_time TEXT,
    estimated_time_remaining INTEGER,
    error TEXT,
    failed_files TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS build_checkpoint (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    phase TEXT NOT NULL,
    last_processed_path TEXT,
    pending_chunk_ids TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);
"#;

/// Run all schema setup. Called during pool creation. Idempotent.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    // vec_chunks is created from the single source of truth constant
    conn.execute(VEC_CHUNKS_CREATE_SQL, [])?;

    // Seed the singleton status row so reads never race row creation
    conn.execute(
        "INSERT OR IGNORE INTO index_status (id) VALUES (1)",
        [],
    )?;

    Ok(())
}
