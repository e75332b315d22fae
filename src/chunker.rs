// src/chunker.rs
// Chunking: split file content into indexable slices
//
// Tree-sitter/symbol chunkers are external collaborators; this module defines
// the contract they satisfy plus a line-window fallback so the pipeline works
// without them.

use crate::types::{Chunk, ChunkKind};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Default window height in lines for the fallback chunker
const DEFAULT_MAX_LINES: usize = 60;

/// Lines of overlap between consecutive windows
const DEFAULT_OVERLAP_LINES: usize = 5;

/// Stable chunk identifier derived from path, in-file index, and the chunk's
/// content hash, so re-chunking unchanged content is idempotent.
pub fn chunk_id(file_path: &str, index: u32, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(index.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(content_hash.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Digest of a chunk's content.
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Contract for chunk producers.
pub trait Chunker: Send + Sync {
    /// Split file content into chunks. `index` ordering must reflect position
    /// within the file.
    fn chunk(&self, file_path: &str, content: &str) -> Vec<Chunk>;
}

/// Line-window fallback chunker with a few lines of overlap between windows.
pub struct LineChunker {
    max_lines: usize,
    overlap: usize,
}

impl Default for LineChunker {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            overlap: DEFAULT_OVERLAP_LINES,
        }
    }
}

impl LineChunker {
    pub fn new(max_lines: usize, overlap: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            overlap: overlap.min(max_lines.saturating_sub(1)),
        }
    }
}

impl Chunker for LineChunker {
    fn chunk(&self, file_path: &str, content: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let step = self.max_lines - self.overlap;
        let mut start = 0usize;
        let mut index = 0u32;

        while start < lines.len() {
            let end = (start + self.max_lines).min(lines.len());
            let text = lines[start..end].join("\n");

            if !text.trim().is_empty() {
                let hash = content_hash(&text);
                chunks.push(Chunk {
                    id: chunk_id(file_path, index, &hash),
                    file_path: file_path.to_string(),
                    content: text,
                    start_line: (start + 1) as u32,
                    end_line: end as u32,
                    index,
                    content_hash: hash,
                    kind: ChunkKind::Block,
                    metadata: HashMap::new(),
                });
                index += 1;
            }

            if end == lines.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}
