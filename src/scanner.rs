// src/scanner.rs
// Repository file scanner: enumerate tracked files with content hashes
//
// Hashes are computed from file bytes, not fs metadata, so identical content
// across renames yields identical hashes. Results are sorted by path so
// checkpoint resume-by-path sees a deterministic order.

use crate::config::ignore::{load_project_ignore_patterns, should_skip_with_patterns};
use crate::error::Result;
use crate::types::FileMetadata;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Files larger than this are excluded from the index (10 MiB).
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Map a file extension to a language name. Unknown extensions yield None
/// rather than failing.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str())? {
        "rs" => Some("rust"),
        "py" | "pyi" => Some("python"),
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "go" => Some("go"),
        "java" => Some("java"),
        "kt" | "kts" => Some("kotlin"),
        "c" | "h" => Some("c"),
        "cc" | "cpp" | "cxx" | "hpp" => Some("cpp"),
        "cs" => Some("csharp"),
        "rb" => Some("ruby"),
        "php" => Some("php"),
        "swift" => Some("swift"),
        "scala" => Some("scala"),
        "sh" | "bash" => Some("shell"),
        "md" | "mdx" => Some("markdown"),
        "toml" => Some("toml"),
        "yaml" | "yml" => Some("yaml"),
        "json" => Some("json"),
        "sql" => Some("sql"),
        _ => None,
    }
}

/// Scans a repository for indexable files.
pub struct FileScanner {
    root: PathBuf,
    extra_ignore: Vec<String>,
}

impl FileScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let extra_ignore = load_project_ignore_patterns(&root);
        Self { root, extra_ignore }
    }

    /// Root directory being scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate all candidate file paths (repo-relative, sorted), without
    /// reading file bodies.
    fn list_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .filter_entry({
                let extra = self.extra_ignore.clone();
                move |entry| {
                    let name = entry.file_name().to_string_lossy();
                    entry.depth() == 0 || !should_skip_with_patterns(&name, &extra)
                }
            })
            .build();

        for entry in walker {
            match entry {
                Ok(e) if e.file_type().is_some_and(|t| t.is_file()) => {
                    if let Ok(rel) = e.path().strip_prefix(&self.root) {
                        paths.push(rel.to_path_buf());
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Failed to access path during scan: {}", e);
                }
            }
        }

        paths.sort();
        paths
    }

    /// Read one file into metadata. Returns None for files that vanished,
    /// exceed the size ceiling, or can't be read (treated as already-deleted).
    fn read_file_meta(&self, relative: &Path) -> Option<FileMetadata> {
        let full = self.root.join(relative);
        let fs_meta = std::fs::metadata(&full).ok()?;
        if !fs_meta.is_file() {
            return None;
        }
        if fs_meta.len() > MAX_FILE_SIZE {
            tracing::debug!("Skipping oversized file {}", relative.display());
            return None;
        }

        let bytes = std::fs::read(&full).ok()?;
        let content_hash = format!("{:x}", Sha256::digest(&bytes));

        let last_modified = fs_meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);

        Some(FileMetadata {
            path: relative.to_string_lossy().to_string(),
            content_hash,
            last_modified,
            size: fs_meta.len(),
            language: detect_language(relative).map(str::to_string),
        })
    }

    /// Full scan: metadata for every tracked file. Finite, callable
    /// repeatedly; not restartable mid-call.
    pub fn scan(&self) -> Result<Vec<FileMetadata>> {
        let paths = self.list_paths();
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(meta) = self.read_file_meta(&path) {
                out.push(meta);
            }
        }
        Ok(out)
    }

    /// Targeted re-scan of specific repo-relative paths. Missing paths are
    /// silently skipped.
    pub fn scan_specific(&self, paths: &[String]) -> Result<Vec<FileMetadata>> {
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(meta) = self.read_file_meta(Path::new(path)) {
                out.push(meta);
            }
        }
        Ok(out)
    }

    /// Count tracked files without reading file bodies.
    pub fn count(&self) -> usize {
        self.list_paths()
            .iter()
            .filter(|p| {
                std::fs::metadata(self.root.join(p))
                    .map(|m| m.is_file() && m.len() <= MAX_FILE_SIZE)
                    .unwrap_or(false)
            })
            .count()
    }

    /// Streaming scan in bounded batches for memory safety.
    ///
    /// Batches arrive on the returned channel (capacity 1, so the walk never
    /// runs far ahead of the consumer). The cancellation token is checked
    /// between batches and races every send; once it fires no further batch
    /// is emitted.
    pub fn scan_streaming(
        &self,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Vec<FileMetadata>> {
        let batch_size = batch_size.max(1);
        let (tx, rx) = mpsc::channel(1);
        let scanner = FileScanner {
            root: self.root.clone(),
            extra_ignore: self.extra_ignore.clone(),
        };

        tokio::spawn(async move {
            let paths = scanner.list_paths();
            let mut batch = Vec::with_capacity(batch_size);

            for path in paths {
                if cancel.is_cancelled() {
                    tracing::debug!("Streaming scan cancelled");
                    return;
                }
                if let Some(meta) = scanner.read_file_meta(&path) {
                    batch.push(meta);
                }
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::debug!("Streaming scan cancelled");
                            return;
                        }
                        sent = tx.send(full) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            }

            if !batch.is_empty() && !cancel.is_cancelled() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tx.send(batch) => {}
                }
            }
        });

        rx
    }
}
