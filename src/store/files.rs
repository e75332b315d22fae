// src/store/files.rs
// File metadata operations: upsert by path, delete cascades to chunks

use crate::types::FileMetadata;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

/// Upsert file metadata rows (by path).
pub fn insert_file_meta_sync(conn: &Connection, files: &[FileMetadata]) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO files (path, content_hash, last_modified, size, language)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 last_modified = excluded.last_modified,
                 size = excluded.size,
                 language = excluded.language",
        )?;
        for file in files {
            stmt.execute(params![
                file.path,
                file.content_hash,
                file.last_modified.to_rfc3339(),
                file.size as i64,
                file.language,
            ])?;
        }
    }
    tx.commit()
}

/// Fetch metadata for a single path.
pub fn get_file_meta_sync(conn: &Connection, path: &str) -> rusqlite::Result<Option<FileMetadata>> {
    let mut stmt = conn.prepare_cached(
        "SELECT path, content_hash, last_modified, size, language FROM files WHERE path = ?",
    )?;
    let mut rows = stmt.query_map([path], row_to_file_meta)?;
    rows.next().transpose()
}

/// Fetch all stored file metadata, ordered by path.
pub fn get_all_file_meta_sync(conn: &Connection) -> rusqlite::Result<Vec<FileMetadata>> {
    let mut stmt = conn.prepare_cached(
        "SELECT path, content_hash, last_modified, size, language FROM files ORDER BY path",
    )?;
    let rows = stmt.query_map([], row_to_file_meta)?;
    rows.collect()
}

/// Delete file metadata rows, cascading to chunks, FTS entries, vectors,
/// and graph edges.
///
/// The cascade runs in one transaction so the FTS index never diverges from
/// the chunk table. Vector rows are deleted by id, one at a time; the vec0
/// virtual table only supports simple-equality deletes.
pub fn delete_file_meta_sync(conn: &Connection, paths: &[String]) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for path in paths {
        let chunk_ids = super::chunks::chunk_ids_for_file_sync(&tx, path)?;
        for id in &chunk_ids {
            tx.execute("DELETE FROM vec_chunks WHERE chunk_id = ?", params![id])?;
            tx.execute(
                "DELETE FROM chunk_edges WHERE from_chunk_id = ?1 OR to_chunk_id = ?1",
                params![id],
            )?;
        }
        tx.execute("DELETE FROM chunks_fts WHERE file_path = ?", params![path])?;
        tx.execute("DELETE FROM chunks WHERE file_path = ?", params![path])?;
        tx.execute("DELETE FROM files WHERE path = ?", params![path])?;
    }
    tx.commit()
}

/// Count of stored file rows.
pub fn count_files_sync(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))
        .unwrap_or(0)
}

/// Languages covering at least `min_share` of files, most common first,
/// capped at `cap`. Used to bias query generation toward the repository's
/// actual languages.
pub fn primary_languages_sync(
    conn: &Connection,
    min_share: f64,
    cap: usize,
) -> rusqlite::Result<Vec<String>> {
    let total = count_files_sync(conn);
    if total == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare_cached(
        "SELECT language, COUNT(*) as n FROM files
         WHERE language IS NOT NULL
         GROUP BY language
         ORDER BY n DESC, language ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut languages = Vec::new();
    for row in rows {
        let (language, count) = row?;
        if (count as f64) / (total as f64) >= min_share {
            languages.push(language);
            if languages.len() >= cap {
                break;
            }
        }
    }
    Ok(languages)
}

fn row_to_file_meta(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileMetadata> {
    let last_modified: String = row.get(2)?;
    Ok(FileMetadata {
        path: row.get(0)?,
        content_hash: row.get(1)?,
        last_modified: last_modified
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
        size: row.get::<_, i64>(3)? as u64,
        language: row.get(4)?,
    })
}
