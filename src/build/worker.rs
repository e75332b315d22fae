// src/build/worker.rs
// Index build worker: scan -> diff -> chunk -> embed -> persist
//
// Runs in its own task and communicates with the supervisor exclusively over
// channels. Cancellation and pause are cooperative, checked between files;
// a checkpoint is written after every persisted batch so a crash or pause
// never loses completed work.

use crate::build::protocol::{WorkerCommand, WorkerEvent};
use crate::chunker::Chunker;
use crate::detector::detect_changes;
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::scanner::FileScanner;
use crate::store::{MetadataStore, VectorStore, embedding_cache_key};
use crate::types::{
    BuildCheckpoint, ChangeSet, Chunk, FileMetadata, IndexPhase, IndexStatus, IndexingProgress,
};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Files chunked+persisted per checkpointed batch
const FILE_BATCH_SIZE: usize = 16;

/// Share of overall progress attributed to the scan phase
const SCAN_PROGRESS_SHARE: f32 = 0.1;

/// What ended a pipeline run
enum BuildOutcome {
    Completed,
    Cancelled,
}

/// Control decision taken between units of work
enum Control {
    Continue,
    Cancel,
}

/// Executes build pipelines on command.
pub struct IndexBuildWorker {
    root: PathBuf,
    store: MetadataStore,
    chunker: Arc<dyn Chunker>,
    embeddings: Option<EmbeddingClient>,
    vectors: Arc<dyn VectorStore>,
    commands: mpsc::Receiver<WorkerCommand>,
    events: mpsc::Sender<WorkerEvent>,
    progress: IndexingProgress,
}

impl IndexBuildWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: PathBuf,
        store: MetadataStore,
        chunker: Arc<dyn Chunker>,
        embeddings: Option<EmbeddingClient>,
        vectors: Arc<dyn VectorStore>,
        commands: mpsc::Receiver<WorkerCommand>,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            root,
            store,
            chunker,
            embeddings,
            vectors,
            commands,
            events,
            progress: IndexingProgress::default(),
        }
    }

    /// Command loop. Exits when the supervisor drops its sender.
    pub async fn run(mut self) {
        tracing::debug!("Build worker started");
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                WorkerCommand::Build {
                    resume_from_checkpoint,
                } => {
                    self.execute(resume_from_checkpoint, None).await;
                }
                WorkerCommand::IncrementalUpdate { changes } => {
                    self.execute(false, Some(changes)).await;
                }
                WorkerCommand::GetStatus => {
                    self.emit(WorkerEvent::Status(self.progress.clone())).await;
                }
                other @ (WorkerCommand::Pause
                | WorkerCommand::Resume
                | WorkerCommand::Cancel) => {
                    // No build in flight; the service rejects these upstream.
                    tracing::debug!("Ignoring {:?} outside a build", other);
                }
            }
        }
        tracing::debug!("Build worker stopped");
    }

    async fn execute(&mut self, resume: bool, changes: Option<ChangeSet>) {
        let incremental = changes.is_some();
        match self.run_pipeline(resume, changes).await {
            Ok(BuildOutcome::Completed) => {
                let event = if incremental {
                    WorkerEvent::UpdateComplete
                } else {
                    WorkerEvent::BuildComplete
                };
                self.emit(event).await;
            }
            Ok(BuildOutcome::Cancelled) => {
                self.progress.status = IndexStatus::Idle;
                self.persist_progress().await;
                self.emit(WorkerEvent::Cancelled).await;
            }
            Err(e) => {
                // Store errors abort the build; the checkpoint stays intact
                // so a retry can resume.
                let message = e.to_string();
                tracing::error!("Build failed: {}", message);
                self.progress.status = IndexStatus::Failed;
                self.progress.error = Some(message.clone());
                self.persist_progress().await;
                self.emit(WorkerEvent::Error { message }).await;
            }
        }
    }

    /// Drain pending control commands; parks on Pause until Resume/Cancel.
    async fn poll_control(&mut self) -> Control {
        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::Pause) => {
                    self.progress.status = IndexStatus::Paused;
                    self.persist_progress().await;
                    self.emit(WorkerEvent::Paused).await;
                    match self.wait_for_resume().await {
                        Control::Continue => continue,
                        Control::Cancel => return Control::Cancel,
                    }
                }
                Ok(WorkerCommand::Cancel) => return Control::Cancel,
                Ok(WorkerCommand::GetStatus) => {
                    self.emit(WorkerEvent::Status(self.progress.clone())).await;
                }
                Ok(other) => {
                    tracing::debug!("Ignoring {:?} while a build is in flight", other);
                }
                Err(mpsc::error::TryRecvError::Empty) => return Control::Continue,
                Err(mpsc::error::TryRecvError::Disconnected) => return Control::Cancel,
            }
        }
    }

    /// Paused: block on the command channel until resumed or cancelled.
    /// Local iteration state is retained, so resume does no re-work.
    async fn wait_for_resume(&mut self) -> Control {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                WorkerCommand::Resume => {
                    self.progress.status = IndexStatus::Building;
                    self.persist_progress().await;
                    self.emit(WorkerEvent::Resumed).await;
                    return Control::Continue;
                }
                WorkerCommand::Cancel => return Control::Cancel,
                WorkerCommand::GetStatus => {
                    self.emit(WorkerEvent::Status(self.progress.clone())).await;
                }
                other => {
                    tracing::debug!("Ignoring {:?} while paused", other);
                }
            }
        }
        Control::Cancel
    }

    async fn run_pipeline(
        &mut self,
        resume: bool,
        changes: Option<ChangeSet>,
    ) -> Result<BuildOutcome> {
        let started = std::time::Instant::now();
        let incremental = changes.is_some();
        self.progress = IndexingProgress {
            status: IndexStatus::Building,
            phase: IndexPhase::Scanning,
            start_time: Some(Utc::now()),
            ..Default::default()
        };
        self.persist_progress().await;
        self.emit(WorkerEvent::Progress(self.progress.clone())).await;

        // Phase 1+2: scan and diff
        let stored = self.store.get_all_file_meta().await?;
        let (scanned, change_set) = match changes {
            Some(change_set) => {
                let mut targets = change_set.added.clone();
                targets.extend(change_set.modified.iter().cloned());
                let root = self.root.clone();
                let scanned = tokio::task::spawn_blocking(move || {
                    FileScanner::new(root).scan_specific(&targets)
                })
                .await??;
                (scanned, change_set)
            }
            None => {
                let root = self.root.clone();
                let scanned =
                    tokio::task::spawn_blocking(move || FileScanner::new(root).scan()).await??;
                let change_set = detect_changes(&scanned, &stored);
                (scanned, change_set)
            }
        };

        self.progress.scanned_files = scanned.len() as u64;
        self.progress.total_files = scanned.len() as u64;
        self.progress.phase_progress = 1.0;
        self.progress.overall_progress = SCAN_PROGRESS_SHARE;
        self.persist_progress().await;
        self.emit(WorkerEvent::Progress(self.progress.clone())).await;

        if let Control::Cancel = self.poll_control().await {
            return Ok(BuildOutcome::Cancelled);
        }

        // Deletions first: cascade clears chunks, FTS entries, and vectors.
        if !change_set.deleted.is_empty() {
            self.store
                .delete_file_meta(change_set.deleted.clone())
                .await?;
        }

        // Work list: added + modified files, deterministic path order so a
        // checkpoint's last_processed_path is meaningful.
        let scanned_by_path: HashMap<&str, &FileMetadata> =
            scanned.iter().map(|f| (f.path.as_str(), f)).collect();
        let mut work: Vec<FileMetadata> = change_set
            .added
            .iter()
            .chain(change_set.modified.iter())
            .filter_map(|p| scanned_by_path.get(p.as_str()).map(|f| (*f).clone()))
            .collect();
        work.sort_by(|a, b| a.path.cmp(&b.path));

        // Resume: skip everything a previous run already persisted.
        if resume
            && let Some(checkpoint) = self.store.get_checkpoint().await?
            && let Some(last) = checkpoint.last_processed_path
        {
            let before = work.len();
            work.retain(|f| f.path.as_str() > last.as_str());
            tracing::info!(
                "Resuming from checkpoint: skipping {} already-processed files",
                before - work.len()
            );
        }

        let work_total = work.len();
        self.progress.phase = IndexPhase::Chunking;
        self.progress.phase_progress = 0.0;
        self.persist_progress().await;

        // Phases 3-5, batched with a checkpoint after each persisted batch.
        let mut batch: Vec<(FileMetadata, Vec<Chunk>)> = Vec::with_capacity(FILE_BATCH_SIZE);
        for (processed, file) in work.into_iter().enumerate() {
            if let Control::Cancel = self.poll_control().await {
                return Ok(BuildOutcome::Cancelled);
            }

            let full_path = self.root.join(&file.path);
            let content = match tokio::fs::read_to_string(&full_path).await {
                Ok(content) => content,
                Err(e) => {
                    // Transient per-item error: record, skip, continue.
                    tracing::warn!("Failed to read {} ({}), skipping", file.path, e);
                    self.progress.failed_files.push(file.path.clone());
                    continue;
                }
            };

            let chunks = self.chunker.chunk(&file.path, &content);
            self.progress.chunked_files += 1;
            self.progress.total_chunks += chunks.len() as u64;
            batch.push((file, chunks));

            if batch.len() >= FILE_BATCH_SIZE {
                self.flush_batch(&mut batch).await?;
            }

            let done = (processed + 1) as f32 / work_total.max(1) as f32;
            self.progress.phase_progress = done;
            self.progress.overall_progress =
                SCAN_PROGRESS_SHARE + (1.0 - SCAN_PROGRESS_SHARE) * done;
            self.progress.estimated_time_remaining = estimate_remaining(
                started.elapsed().as_secs_f32(),
                self.progress.overall_progress,
            );
        }
        self.flush_batch(&mut batch).await?;

        // Phase 8: success clears the checkpoint.
        self.store.clear_checkpoint().await?;
        self.progress.status = IndexStatus::Done;
        self.progress.phase = IndexPhase::Persisting;
        self.progress.phase_progress = 1.0;
        self.progress.overall_progress = 1.0;
        self.progress.estimated_time_remaining = None;
        self.persist_progress().await;
        self.emit(WorkerEvent::Progress(self.progress.clone())).await;

        tracing::info!(
            "{} complete: {} files scanned, {} chunked, {} chunks stored, {} failed",
            if incremental { "Update" } else { "Build" },
            self.progress.scanned_files,
            self.progress.chunked_files,
            self.progress.stored_chunks,
            self.progress.failed_files.len(),
        );
        Ok(BuildOutcome::Completed)
    }

    /// Embed and persist one batch of chunked files, then checkpoint.
    async fn flush_batch(&mut self, batch: &mut Vec<(FileMetadata, Vec<Chunk>)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let files: Vec<FileMetadata> = batch.iter().map(|(f, _)| f.clone()).collect();
        let all_chunks: Vec<Chunk> = batch.iter().flat_map(|(_, c)| c.iter().cloned()).collect();
        let last_path = files.iter().map(|f| f.path.clone()).max();

        // Stale chunks of modified files go first so replacement is wholesale.
        self.store
            .delete_chunks_by_file_path(files.iter().map(|f| f.path.clone()).collect())
            .await?;

        self.progress.phase = IndexPhase::Embedding;
        let vectors = self.embed_chunks(&all_chunks).await;
        self.progress.embedded_chunks += vectors.len() as u64;

        self.progress.phase = IndexPhase::Persisting;
        let stored = self.store.insert_chunks(all_chunks).await?;
        self.progress.stored_chunks += stored as u64;
        if !vectors.is_empty() {
            self.vectors.insert(vectors).await?;
        }
        self.store.insert_file_meta(files).await?;

        self.store
            .save_checkpoint(BuildCheckpoint {
                phase: IndexPhase::Persisting,
                last_processed_path: last_path,
                pending_chunk_ids: Vec::new(),
                updated_at: Utc::now(),
            })
            .await?;

        batch.clear();
        self.persist_progress().await;
        self.emit(WorkerEvent::Progress(self.progress.clone())).await;
        Ok(())
    }

    /// Embed chunks, consulting the cache by content hash first. Embedding
    /// failures are transient per-item errors: the owning files are recorded
    /// and the chunks stay searchable through FTS.
    async fn embed_chunks(&mut self, chunks: &[Chunk]) -> Vec<(String, Vec<f32>)> {
        let Some(client) = self.embeddings.clone() else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(chunks.len());
        let mut misses: Vec<&Chunk> = Vec::new();

        for chunk in chunks {
            let key = embedding_cache_key(&chunk.content_hash, &client.model_id(), client.dimensions());
            match self.store.get_embedding_cache(&key).await {
                Ok(Some(vector)) => out.push((chunk.id.clone(), vector)),
                Ok(None) => misses.push(chunk),
                Err(e) => {
                    tracing::warn!("Embedding cache read failed ({}), treating as miss", e);
                    misses.push(chunk);
                }
            }
        }

        if misses.is_empty() {
            return out;
        }

        let texts: Vec<String> = misses.iter().map(|c| c.content.clone()).collect();
        match client.embed(&texts).await {
            Ok(vectors) => {
                for (chunk, vector) in misses.iter().zip(vectors) {
                    let key = embedding_cache_key(
                        &chunk.content_hash,
                        &client.model_id(),
                        client.dimensions(),
                    );
                    if let Err(e) = self.store.set_embedding_cache(&key, vector.clone()).await {
                        tracing::warn!("Embedding cache write failed: {}", e);
                    }
                    out.push((chunk.id.clone(), vector));
                }
            }
            Err(e) => {
                tracing::warn!("Batch embedding failed ({}), chunks stay FTS-only", e);
                for chunk in &misses {
                    if !self.progress.failed_files.contains(&chunk.file_path) {
                        self.progress.failed_files.push(chunk.file_path.clone());
                    }
                }
            }
        }

        out
    }

    async fn persist_progress(&self) {
        if let Err(e) = self.store.update_index_status(self.progress.clone()).await {
            tracing::warn!("Failed to persist progress: {}", e);
        }
    }

    async fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Event listener gone");
        }
    }
}

/// Seconds remaining, extrapolated from elapsed time and overall progress.
fn estimate_remaining(elapsed_secs: f32, overall_progress: f32) -> Option<u64> {
    if overall_progress <= 0.05 || overall_progress >= 1.0 {
        return None;
    }
    let total = elapsed_secs / overall_progress;
    Some((total - elapsed_secs).max(0.0) as u64)
}
