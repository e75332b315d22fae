// src/types.rs
// Shared data model: file metadata, chunks, progress, checkpoints, search results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use strum::Display;

/// Metadata for a single tracked repository file.
///
/// Upserted on each successful scan of a changed file; deleting it cascades
/// to the file's chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Repo-relative path, unique per project
    pub path: String,
    /// Digest of the file bytes (not of fs metadata), so identical content
    /// across renames yields identical hashes
    pub content_hash: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    /// Detected language; None for unknown extensions
    pub language: Option<String>,
}

/// Kind of code chunk produced by a chunker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Class,
    Module,
    Block,
}

/// A contiguous slice of a source file, the unit of indexing and retrieval.
///
/// Owned exclusively by one file; the whole set is replaced when the owning
/// file's content hash changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier, derived from path + index + content hash
    pub id: String,
    pub file_path: String,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Position within the owning file, 0-based
    pub index: u32,
    pub content_hash: String,
    pub kind: ChunkKind,
    /// Opaque key/value bag carried through from the chunker
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Which search path produced a scored chunk
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Bm25,
    Vector,
    Recent,
    Hyde,
}

/// A chunk with its per-source relevance score and rank
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    /// 1-based rank within the producing source's result list
    pub rank: usize,
    pub source: SearchSource,
}

/// A chunk after reciprocal-rank fusion across sources
#[derive(Debug, Clone)]
pub struct FusedScoredChunk {
    pub chunk: Chunk,
    pub fused_score: f32,
    /// The set of sources that contributed; order-irrelevant
    pub sources: BTreeSet<SearchSource>,
}

/// Added/modified/deleted file paths between a fresh scan and the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed paths
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

/// Overall build status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    #[default]
    Idle,
    Building,
    Paused,
    Done,
    Failed,
}

impl IndexStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "building" => Self::Building,
            "paused" => Self::Paused,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// Pipeline phase the build is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IndexPhase {
    #[default]
    Scanning,
    Chunking,
    Embedding,
    Persisting,
}

impl IndexPhase {
    pub fn parse(s: &str) -> Self {
        match s {
            "chunking" => Self::Chunking,
            "embedding" => Self::Embedding,
            "persisting" => Self::Persisting,
            _ => Self::Scanning,
        }
    }
}

/// Singleton progress record for the current/most recent build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IndexingProgress {
    pub status: IndexStatus,
    pub phase: IndexPhase,
    /// Completion of the current phase, 0.0..=1.0
    pub phase_progress: f32,
    /// Completion of the whole build, 0.0..=1.0
    pub overall_progress: f32,
    pub scanned_files: u64,
    pub total_files: u64,
    pub chunked_files: u64,
    pub embedded_chunks: u64,
    pub total_chunks: u64,
    pub stored_chunks: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub estimated_time_remaining: Option<u64>,
    pub error: Option<String>,
    /// Paths that failed transiently and were skipped
    #[serde(default)]
    pub failed_files: Vec<String>,
}

/// Singleton crash-recovery checkpoint.
///
/// A stored checkpoint implies an interrupted build exists that a resume can
/// continue from; a successful build clears it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildCheckpoint {
    pub phase: IndexPhase,
    pub last_processed_path: Option<String>,
    pub pending_chunk_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Graph expansion output: related chunks plus the edges that reached them
#[derive(Debug, Clone, Default)]
pub struct GraphExpansion {
    pub related_chunk_ids: Vec<String>,
    pub edges: Vec<GraphEdge>,
}

/// A single symbol-graph edge between two chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_chunk_id: String,
    pub to_chunk_id: String,
    pub relation: String,
}

/// Store-level counts for diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub files: u64,
    pub chunks: u64,
    pub cached_embeddings: u64,
}
