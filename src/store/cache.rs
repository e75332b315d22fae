// src/store/cache.rs
// Content-addressed embedding cache
//
// Keys are a digest of chunk content + embedding parameters; entries are
// write-once per key and never invalidated automatically. Collision avoidance
// is the caller's job via content hashing.

use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};

/// Serialize an embedding vector to little-endian f32 bytes.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize little-endian f32 bytes back into a vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Build a cache key from chunk content and embedding parameters.
pub fn embedding_cache_key(content_hash: &str, model: &str, dimensions: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    hasher.update(b"\0");
    hasher.update(dimensions.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Look up a cached embedding by key.
pub fn get_embedding_cache_sync(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<Vec<f32>>> {
    let bytes: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM embedding_cache WHERE cache_key = ?",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(bytes.map(|b| bytes_to_embedding(&b)))
}

/// Store an embedding under a key. Existing keys are left untouched
/// (write-once semantics).
pub fn set_embedding_cache_sync(
    conn: &Connection,
    key: &str,
    embedding: &[f32],
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO embedding_cache (cache_key, embedding) VALUES (?, ?)",
        params![key, embedding_to_bytes(embedding)],
    )?;
    Ok(())
}

/// Count of cached embeddings.
pub fn count_cached_embeddings_sync(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |r| r.get(0))
        .unwrap_or(0)
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
    fn test_byte_round_trip_is_exact() {
        let original = vec![0.0f32, -1.5, 3.25, f32::MIN_POSITIVE, 1e30];
        let bytes = embedding_to_bytes(&original);
        assert_eq!(bytes.len(), original.len() * 4);
        assert_eq!(bytes_to_embedding(&bytes), original);
    }

    #[test]
    fn test_cache_round_trip() {
        let conn = test_conn();
        let key = embedding_cache_key("abc123", "test-model", 4);
        let vector = vec![0.1f32, 0.2, 0.3, 0.4];

        set_embedding_cache_sync(&conn, &key, &vector).unwrap();
        let got = get_embedding_cache_sync(&conn, &key).unwrap().unwrap();
        assert_eq!(got, vector);
    }

    #[test]
    fn test_cache_miss() {
        let conn = test_conn();
        assert!(get_embedding_cache_sync(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_cache_write_once() {
        let conn = test_conn();
        let key = "fixed-key";
        set_embedding_cache_sync(&conn, key, &[1.0]).unwrap();
        set_embedding_cache_sync(&conn, key, &[2.0]).unwrap();

        // First write wins
        assert_eq!(get_embedding_cache_sync(&conn, key).unwrap().unwrap(), vec![1.0]);
        assert_eq!(count_cached_embeddings_sync(&conn), 1);
    }

    #[test]
    fn test_cache_key_varies_with_parameters() {
        let a = embedding_cache_key("hash", "model-a", 1536);
        let b = embedding_cache_key("hash", "model-b", 1536);
        let c = embedding_cache_key("hash", "model-a", 768);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, embedding_cache_key("hash", "model-a", 1536));
    }
}
