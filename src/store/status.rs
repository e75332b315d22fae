// src/store/status.rs
// Singleton rows: indexing progress and crash-recovery checkpoint
//
// Both live in dedicated single-row tables guarded by CHECK (id = 1); the
// store enforces the singleton, not the caller.

use crate::types::{BuildCheckpoint, IndexPhase, IndexStatus, IndexingProgress};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

/// Read the singleton progress record.
pub fn get_index_status_sync(conn: &Connection) -> rusqlite::Result<IndexingProgress> {
    conn.query_row(
        "SELECT status, phase, phase_progress, overall_progress,
                scanned_files, total_files, chunked_files, embedded_chunks,
                total_chunks, stored_chunks, start_time, estimated_time_remaining,
                error, failed_files
         FROM index_status WHERE id = 1",
        [],
        |row| {
            let status: String = row.get(0)?;
            let phase: String = row.get(1)?;
            let start_time: Option<String> = row.get(10)?;
            let failed_files: String = row.get(13)?;
            Ok(IndexingProgress {
                status: IndexStatus::parse(&status),
                phase: IndexPhase::parse(&phase),
                phase_progress: row.get::<_, f64>(2)? as f32,
                overall_progress: row.get::<_, f64>(3)? as f32,
                scanned_files: row.get::<_, i64>(4)? as u64,
                total_files: row.get::<_, i64>(5)? as u64,
                chunked_files: row.get::<_, i64>(6)? as u64,
                embedded_chunks: row.get::<_, i64>(7)? as u64,
                total_chunks: row.get::<_, i64>(8)? as u64,
                stored_chunks: row.get::<_, i64>(9)? as u64,
                start_time: start_time.and_then(|s| s.parse::<DateTime<Utc>>().ok()),
                estimated_time_remaining: row.get::<_, Option<i64>>(11)?.map(|v| v as u64),
                error: row.get(12)?,
                failed_files: serde_json::from_str(&failed_files).unwrap_or_default(),
            })
        },
    )
}

/// Overwrite the singleton progress record.
pub fn update_index_status_sync(
    conn: &Connection,
    progress: &IndexingProgress,
) -> rusqlite::Result<()> {
    let failed_files =
        serde_json::to_string(&progress.failed_files).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "UPDATE index_status SET
             status = ?, phase = ?, phase_progress = ?, overall_progress = ?,
             scanned_files = ?, total_files = ?, chunked_files = ?,
             embedded_chunks = ?, total_chunks = ?, stored_chunks = ?,
             start_time = ?, estimated_time_remaining = ?, error = ?, failed_files = ?
         WHERE id = 1",
        params![
            progress.status.to_string(),
            progress.phase.to_string(),
            progress.phase_progress as f64,
            progress.overall_progress as f64,
            progress.scanned_files as i64,
            progress.total_files as i64,
            progress.chunked_files as i64,
            progress.embedded_chunks as i64,
            progress.total_chunks as i64,
            progress.stored_chunks as i64,
            progress.start_time.map(|t| t.to_rfc3339()),
            progress.estimated_time_remaining.map(|v| v as i64),
            progress.error,
            failed_files,
        ],
    )?;
    Ok(())
}

/// Read the checkpoint, if an interrupted build left one.
pub fn get_checkpoint_sync(conn: &Connection) -> rusqlite::Result<Option<BuildCheckpoint>> {
    conn.query_row(
        "SELECT phase, last_processed_path, pending_chunk_ids, updated_at
         FROM build_checkpoint WHERE id = 1",
        [],
        |row| {
            let phase: String = row.get(0)?;
            let pending: String = row.get(2)?;
            let updated_at: String = row.get(3)?;
            Ok(BuildCheckpoint {
                phase: IndexPhase::parse(&phase),
                last_processed_path: row.get(1)?,
                pending_chunk_ids: serde_json::from_str(&pending).unwrap_or_default(),
                updated_at: updated_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            })
        },
    )
    .optional()
}

/// Write (or replace) the checkpoint.
pub fn save_checkpoint_sync(
    conn: &Connection,
    checkpoint: &BuildCheckpoint,
) -> rusqlite::Result<()> {
    let pending = serde_json::to_string(&checkpoint.pending_chunk_ids)
        .unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO build_checkpoint (id, phase, last_processed_path, pending_chunk_ids, updated_at)
         VALUES (1, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             phase = excluded.phase,
             last_processed_path = excluded.last_processed_path,
             pending_chunk_ids = excluded.pending_chunk_ids,
             updated_at = excluded.updated_at",
        params![
            checkpoint.phase.to_string(),
            checkpoint.last_processed_path,
            pending,
            checkpoint.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Clear the checkpoint. A build that completes successfully must call this.
pub fn clear_checkpoint_sync(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM build_checkpoint WHERE id = 1", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::pool::ensure_sqlite_vec_registered;
    use crate::store::schema::run_migrations;

    fn test_conn() -> Connection {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_default_status_is_idle() {
        let conn = test_conn();
        let progress = get_index_status_sync(&conn).unwrap();
        assert_eq!(progress.status, IndexStatus::Idle);
        assert_eq!(progress.total_files, 0);
        assert!(progress.failed_files.is_empty());
    }

    #[test]
    fn test_update_and_read_status() {
        let conn = test_conn();
        let progress = IndexingProgress {
            status: IndexStatus::Building,
            phase: IndexPhase::Embedding,
            phase_progress: 0.5,
            overall_progress: 0.7,
            scanned_files: 10,
            total_files: 10,
            chunked_files: 10,
            embedded_chunks: 50,
            total_chunks: 100,
            stored_chunks: 50,
            start_time: Some(Utc::now()),
            estimated_time_remaining: Some(30),
            error: None,
            failed_files: vec!["src/broken.rs".to_string()],
        };
        update_index_status_sync(&conn, &progress).unwrap();

        let got = get_index_status_sync(&conn).unwrap();
        assert_eq!(got.status, IndexStatus::Building);
        assert_eq!(got.phase, IndexPhase::Embedding);
        assert_eq!(got.embedded_chunks, 50);
        assert_eq!(got.failed_files, vec!["src/broken.rs"]);
    }

    #[test]
    fn test_checkpoint_absent_by_default() {
        let conn = test_conn();
        assert!(get_checkpoint_sync(&conn).unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_save_read_clear() {
        let conn = test_conn();
        let cp = BuildCheckpoint {
            phase: IndexPhase::Chunking,
            last_processed_path: Some("src/m.rs".to_string()),
            pending_chunk_ids: vec!["c1".to_string(), "c2".to_string()],
            updated_at: Utc::now(),
        };
        save_checkpoint_sync(&conn, &cp).unwrap();

        let got = get_checkpoint_sync(&conn).unwrap().unwrap();
        assert_eq!(got.phase, IndexPhase::Chunking);
        assert_eq!(got.last_processed_path.as_deref(), Some("src/m.rs"));
        assert_eq!(got.pending_chunk_ids, vec!["c1", "c2"]);

        clear_checkpoint_sync(&conn).unwrap();
        assert!(get_checkpoint_sync(&conn).unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_save_is_singleton() {
        let conn = test_conn();
        for i in 0..3 {
            save_checkpoint_sync(
                &conn,
                &BuildCheckpoint {
                    phase: IndexPhase::Scanning,
                    last_processed_path: Some(format!("f{i}")),
                    pending_chunk_ids: vec![],
                    updated_at: Utc::now(),
                },
            )
            .unwrap();
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM build_checkpoint", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        // Latest write wins
        let got = get_checkpoint_sync(&conn).unwrap().unwrap();
        assert_eq!(got.last_processed_path.as_deref(), Some("f2"));
    }
}
