// src/store/chunks.rs
// Chunk persistence and full-text search
//
// Chunk rows and their FTS entries are mutated inside the same transaction,
// always. A chunk visible in chunks but not chunks_fts (or vice versa) is a
// corruption bug, not an eventual-consistency state.

use crate::types::{Chunk, ChunkKind};
use regex::Regex;
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Chunks inserted per transaction; keeps a partial failure from poisoning
/// unrelated batches.
const INSERT_BATCH_SIZE: usize = 500;

/// Term extractor for FTS query sanitization. Anything that is not an
/// identifier-ish token (including FTS5 operators like ", *, NEAR) is dropped.
static TERM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").unwrap_or_else(|_| unreachable!()));

/// Insert-or-replace chunks in batches, keeping chunks_fts synchronized in
/// the same transaction.
pub fn insert_chunks_sync(conn: &Connection, chunks: &[Chunk]) -> rusqlite::Result<usize> {
    let mut stored = 0usize;
    for batch in chunks.chunks(INSERT_BATCH_SIZE) {
        let tx = conn.unchecked_transaction()?;
        {
            let mut del_fts = tx.prepare_cached("DELETE FROM chunks_fts WHERE chunk_id = ?")?;
            let mut ins = tx.prepare_cached(
                "INSERT OR REPLACE INTO chunks
                     (id, file_path, content, start_line, end_line, chunk_index, content_hash, kind, metadata)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            let mut ins_fts = tx.prepare_cached(
                "INSERT INTO chunks_fts (chunk_id, file_path, content) VALUES (?, ?, ?)",
            )?;
            for chunk in batch {
                let metadata = serde_json::to_string(&chunk.metadata)
                    .unwrap_or_else(|_| "{}".to_string());
                del_fts.execute(params![chunk.id])?;
                ins.execute(params![
                    chunk.id,
                    chunk.file_path,
                    chunk.content,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.index,
                    chunk.content_hash,
                    chunk.kind.to_string(),
                    metadata,
                ])?;
                ins_fts.execute(params![chunk.id, chunk.file_path, chunk.content])?;
                stored += 1;
            }
        }
        tx.commit()?;
    }
    Ok(stored)
}

/// All chunks of one file, ordered by in-file index.
pub fn get_chunks_by_file_path_sync(
    conn: &Connection,
    file_path: &str,
) -> rusqlite::Result<Vec<Chunk>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, file_path, content, start_line, end_line, chunk_index, content_hash, kind, metadata
         FROM chunks WHERE file_path = ? ORDER BY chunk_index",
    )?;
    let rows = stmt.query_map([file_path], row_to_chunk)?;
    rows.collect()
}

/// Chunk ids owned by one file.
pub(super) fn chunk_ids_for_file_sync(
    conn: &Connection,
    path: &str,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT id FROM chunks WHERE file_path = ?")?;
    let rows = stmt.query_map([path], |row| row.get::<_, String>(0))?;
    rows.collect()
}

/// Delete all chunks (and FTS entries, and vectors) for the given files in
/// one transaction. Vector rows go one by one; the vec0 virtual table only
/// supports simple-equality deletes.
pub fn delete_chunks_by_file_path_sync(
    conn: &Connection,
    paths: &[String],
) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for path in paths {
        for id in chunk_ids_for_file_sync(&tx, path)? {
            tx.execute("DELETE FROM vec_chunks WHERE chunk_id = ?", params![id])?;
        }
        tx.execute("DELETE FROM chunks_fts WHERE file_path = ?", params![path])?;
        tx.execute("DELETE FROM chunks WHERE file_path = ?", params![path])?;
    }
    tx.commit()
}

/// Fetch chunks by id; missing ids are silently absent from the result.
pub fn get_chunks_by_ids_sync(
    conn: &Connection,
    ids: &[String],
) -> rusqlite::Result<Vec<Chunk>> {
    let mut out = Vec::with_capacity(ids.len());
    let mut stmt = conn.prepare_cached(
        "SELECT id, file_path, content, start_line, end_line, chunk_index, content_hash, kind, metadata
         FROM chunks WHERE id = ?",
    )?;
    for id in ids {
        let mut rows = stmt.query_map([id], row_to_chunk)?;
        if let Some(chunk) = rows.next().transpose()? {
            out.push(chunk);
        }
    }
    Ok(out)
}

/// First chunk of each of the N most-recently-modified files, with a
/// synthetic recency score `max(0, 1 - 0.05*(rank-1))`, rank starting at 1.
pub fn get_recent_chunks_sync(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<(Chunk, f32)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT c.id, c.file_path, c.content, c.start_line, c.end_line, c.chunk_index,
                c.content_hash, c.kind, c.metadata
         FROM files f
         JOIN chunks c ON c.file_path = f.path AND c.chunk_index = 0
         ORDER BY f.last_modified DESC
         LIMIT ?",
    )?;
    let rows = stmt.query_map([limit as i64], row_to_chunk)?;

    let mut out = Vec::new();
    for (i, row) in rows.enumerate() {
        let chunk = row?;
        let score = (1.0 - 0.05 * i as f32).max(0.0);
        out.push((chunk, score));
    }
    Ok(out)
}

/// Sanitize a raw query into an FTS5 MATCH expression.
///
/// Strips operator characters by extracting identifier-ish terms, drops
/// single-character terms, OR-combines the rest. Returns None when nothing
/// searchable remains.
pub fn sanitize_fts_query(query: &str) -> Option<String> {
    let terms: Vec<&str> = TERM_RE
        .find_iter(query)
        .map(|m| m.as_str())
        .filter(|t| t.len() > 1)
        .collect();
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Full-text search over chunk content, ranked by bm25.
///
/// Empty and invalid queries return no results rather than erroring.
pub fn search_fts_sync(
    conn: &Connection,
    query: &str,
    limit: usize,
) -> rusqlite::Result<Vec<(Chunk, f32)>> {
    let Some(match_expr) = sanitize_fts_query(query) else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare_cached(
        "SELECT c.id, c.file_path, c.content, c.start_line, c.end_line, c.chunk_index,
                c.content_hash, c.kind, c.metadata,
                bm25(chunks_fts) AS rank
         FROM chunks_fts
         JOIN chunks c ON c.id = chunks_fts.chunk_id
         WHERE chunks_fts MATCH ?
         ORDER BY rank
         LIMIT ?",
    )?;
    let rows = stmt.query_map(params![match_expr, limit as i64], |row| {
        let chunk = row_to_chunk(row)?;
        // bm25() is negative with better matches more negative; flip so
        // higher is better for callers.
        let rank: f64 = row.get(9)?;
        Ok((chunk, -rank as f32))
    });

    // A MATCH against a malformed expression surfaces as a query error; per
    // contract that degrades to an empty result set.
    match rows {
        Ok(rows) => rows.collect(),
        Err(e) => {
            tracing::debug!("FTS query rejected ({}), returning no results", e);
            Ok(Vec::new())
        }
    }
}

/// Count of stored chunk rows.
pub fn count_chunks_sync(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))
        .unwrap_or(0)
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let kind: String = row.get(7)?;
    let metadata: String = row.get(8)?;
    Ok(Chunk {
        id: row.get(0)?,
        file_path: row.get(1)?,
        content: row.get(2)?,
        start_line: row.get(3)?,
        end_line: row.get(4)?,
        index: row.get(5)?,
        content_hash: row.get(6)?,
        kind: parse_kind(&kind),
        metadata: serde_json::from_str::<HashMap<String, String>>(&metadata)
            .unwrap_or_default(),
    })
}

fn parse_kind(s: &str) -> ChunkKind {
    match s {
        "function" => ChunkKind::Function,
        "class" => ChunkKind::Class,
        "module" => ChunkKind::Module,
        _ => ChunkKind::Block,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::files::insert_file_meta_sync;
    use crate::store::pool::ensure_sqlite_vec_registered;
    use crate::store::schema::run_migrations;
    use crate::types::FileMetadata;
    use chrono::{Duration, Utc};

    fn test_conn() -> Connection {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn chunk(id: &str, path: &str, index: u32, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            file_path: path.to_string(),
            content: content.to_string(),
            start_line: index * 10 + 1,
            end_line: index * 10 + 10,
            index,
            content_hash: format!("hash-{id}"),
            kind: ChunkKind::Block,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_insert_and_get_ordered() {
        let conn = test_conn();
        insert_chunks_sync(
            &conn,
            &[
                chunk("c2", "src/a.rs", 1, "second"),
                chunk("c1", "src/a.rs", 0, "first"),
            ],
        )
        .unwrap();

        let got = get_chunks_by_file_path_sync(&conn, "src/a.rs").unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].id, "c1");
        assert_eq!(got[1].id, "c2");
    }

    #[test]
    fn test_insert_is_idempotent() {
        let conn = test_conn();
        let c = chunk("c1", "src/a.rs", 0, "fn connect_pool() {}");
        insert_chunks_sync(&conn, &[c.clone()]).unwrap();
        insert_chunks_sync(&conn, &[c]).unwrap();

        assert_eq!(count_chunks_sync(&conn), 1);
        // FTS stays in lock-step: exactly one entry for the chunk
        let fts_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks_fts WHERE chunk_id = 'c1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(fts_count, 1);
    }

    #[test]
    fn test_delete_removes_fts_entries() {
        let conn = test_conn();
        insert_chunks_sync(&conn, &[chunk("c1", "src/a.rs", 0, "fn widget_factory() {}")])
            .unwrap();

        let hits = search_fts_sync(&conn, "widget_factory", 10).unwrap();
        assert_eq!(hits.len(), 1);

        delete_chunks_by_file_path_sync(&conn, &["src/a.rs".to_string()]).unwrap();
        let hits = search_fts_sync(&conn, "widget_factory", 10).unwrap();
        assert!(hits.is_empty());
        assert_eq!(count_chunks_sync(&conn), 0);
    }

    #[test]
    fn test_search_fts_ranks_matches() {
        let conn = test_conn();
        insert_chunks_sync(
            &conn,
            &[
                chunk("c1", "src/a.rs", 0, "fn parse_config() { parse_config_inner() }"),
                chunk("c2", "src/b.rs", 0, "fn unrelated() {}"),
            ],
        )
        .unwrap();

        let hits = search_fts_sync(&conn, "parse_config", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "c1");
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn test_search_fts_empty_query() {
        let conn = test_conn();
        insert_chunks_sync(&conn, &[chunk("c1", "src/a.rs", 0, "content")]).unwrap();
        assert!(search_fts_sync(&conn, "", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_fts_single_char_query() {
        let conn = test_conn();
        insert_chunks_sync(&conn, &[chunk("c1", "src/a.rs", 0, "a b c")]).unwrap();
        assert!(search_fts_sync(&conn, "a", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_fts_operator_characters_stripped() {
        let conn = test_conn();
        insert_chunks_sync(&conn, &[chunk("c1", "src/a.rs", 0, "fn connect() {}")]).unwrap();
        // Quotes, stars, and NEAR-ish syntax must not cause an error
        let hits = search_fts_sync(&conn, "\"connect\"* NEAR(", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_sanitize_drops_short_terms() {
        assert_eq!(
            sanitize_fts_query("a bm25 x fusion"),
            Some("\"bm25\" OR \"fusion\"".to_string())
        );
        assert_eq!(sanitize_fts_query("a b"), None);
        assert_eq!(sanitize_fts_query("***"), None);
    }

    #[test]
    fn test_recent_chunks_scores() {
        let conn = test_conn();
        let now = Utc::now();
        let files: Vec<FileMetadata> = (0..3)
            .map(|i| FileMetadata {
                path: format!("src/{i}.rs"),
                content_hash: format!("h{i}"),
                // file 0 newest
                last_modified: now - Duration::hours(i),
                size: 1,
                language: Some("rust".into()),
            })
            .collect();
        insert_file_meta_sync(&conn, &files).unwrap();
        insert_chunks_sync(
            &conn,
            &[
                chunk("c0", "src/0.rs", 0, "zero"),
                chunk("c0b", "src/0.rs", 1, "zero b"),
                chunk("c1", "src/1.rs", 0, "one"),
                chunk("c2", "src/2.rs", 0, "two"),
            ],
        )
        .unwrap();

        let recent = get_recent_chunks_sync(&conn, 10).unwrap();
        assert_eq!(recent.len(), 3);
        // First chunk of the newest file, with rank-1 score 1.0
        assert_eq!(recent[0].0.id, "c0");
        assert!((recent[0].1 - 1.0).abs() < f32::EPSILON);
        assert!((recent[1].1 - 0.95).abs() < 1e-6);
        assert!((recent[2].1 - 0.90).abs() < 1e-6);
    }

    #[test]
    fn test_get_chunks_by_ids_skips_missing() {
        let conn = test_conn();
        insert_chunks_sync(&conn, &[chunk("c1", "src/a.rs", 0, "content")]).unwrap();
        let got =
            get_chunks_by_ids_sync(&conn, &["c1".to_string(), "ghost".to_string()]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "c1");
    }
}
