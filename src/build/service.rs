// src/build/service.rs
// Index service: supervises the build worker's lifecycle
//
// Owns worker spawning, crash recovery with bounded retries, the drift-poll
// loop, and the event fan-out to listeners. The supervisor never touches
// build state directly; it only exchanges protocol messages with the worker.

use crate::branch::BranchHandler;
use crate::build::protocol::{WorkerCommand, WorkerEvent};
use crate::build::worker::IndexBuildWorker;
use crate::chunker::Chunker;
use crate::config::QuarryConfig;
use crate::detector::detect_changes;
use crate::embeddings::EmbeddingClient;
use crate::error::{QuarryError, Result};
use crate::scanner::FileScanner;
use crate::store::{MetadataStore, VectorStore};
use crate::types::{ChangeSet, IndexStatus, IndexingProgress};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};

/// Command channel depth between supervisor and worker
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Event channel depth from worker to supervisor
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcast capacity for external listeners
const BROADCAST_CAPACITY: usize = 256;

/// Supervision tunables.
#[derive(Debug, Clone)]
pub struct IndexServiceConfig {
    /// Interval between drift-detection poll cycles
    pub poll_interval: Duration,
    /// Backoff before respawning a crashed worker
    pub recovery_backoff: Duration,
    /// Consecutive crashes tolerated before the build is failed
    pub max_recovery_attempts: u32,
}

impl Default for IndexServiceConfig {
    fn default() -> Self {
        Self::from_config(&QuarryConfig::default())
    }
}

impl IndexServiceConfig {
    pub fn from_config(config: &QuarryConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            recovery_backoff: config.recovery_backoff(),
            max_recovery_attempts: config.max_recovery_attempts(),
        }
    }
}

/// Supervisor-side view of the worker. The worker owns all build state; this
/// is only the control handle, the in-flight flag, and the retry counter.
struct SupervisorState {
    commands: Option<mpsc::Sender<WorkerCommand>>,
    building: bool,
    paused: bool,
    crashes: u32,
    resume_on_spawn: bool,
    shutdown: bool,
}

struct ServiceInner {
    root: PathBuf,
    store: MetadataStore,
    chunker: Arc<dyn Chunker>,
    embeddings: Option<EmbeddingClient>,
    vectors: Arc<dyn VectorStore>,
    config: IndexServiceConfig,
    state: Mutex<SupervisorState>,
    branch: Mutex<BranchHandler>,
    events: broadcast::Sender<WorkerEvent>,
}

/// Supervises index builds for one project.
#[derive(Clone)]
pub struct IndexService {
    inner: Arc<ServiceInner>,
}

impl IndexService {
    pub async fn new(
        root: PathBuf,
        store: MetadataStore,
        chunker: Arc<dyn Chunker>,
        embeddings: Option<EmbeddingClient>,
        vectors: Arc<dyn VectorStore>,
        config: IndexServiceConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);

        let mut branch = BranchHandler::new(&root);
        branch.on_switch(Box::new(|previous, current| {
            tracing::info!(
                "Branch switched {} -> {}, treating as bulk file change",
                previous.unwrap_or("<none>"),
                current
            );
        }));

        let inner = Arc::new(ServiceInner {
            root,
            store,
            chunker,
            embeddings,
            vectors,
            config,
            state: Mutex::new(SupervisorState {
                commands: None,
                building: false,
                paused: false,
                crashes: 0,
                resume_on_spawn: false,
                shutdown: false,
            }),
            branch: Mutex::new(branch),
            events,
        });

        // First worker exists before new() returns so control calls never
        // race worker startup; the supervisor handles all later respawns.
        let event_rx = Self::spawn_worker(&inner).await;
        tokio::spawn(Self::supervise(inner.clone(), event_rx));

        Self { inner }
    }

    /// Spawn a fresh worker and install its command handle.
    async fn spawn_worker(inner: &Arc<ServiceInner>) -> mpsc::Receiver<WorkerEvent> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let worker = IndexBuildWorker::new(
            inner.root.clone(),
            inner.store.clone(),
            inner.chunker.clone(),
            inner.embeddings.clone(),
            inner.vectors.clone(),
            command_rx,
            event_tx,
        );
        tokio::spawn(worker.run());

        inner.state.lock().await.commands = Some(command_tx);
        event_rx
    }

    /// Supervision loop: pump worker events; on unexpected worker death while
    /// a build is in flight, recover from the checkpoint with bounded retries.
    async fn supervise(inner: Arc<ServiceInner>, mut event_rx: mpsc::Receiver<WorkerEvent>) {
        loop {
            while let Some(event) = event_rx.recv().await {
                {
                    let mut state = inner.state.lock().await;
                    match &event {
                        WorkerEvent::BuildComplete | WorkerEvent::UpdateComplete => {
                            state.building = false;
                            state.paused = false;
                            state.crashes = 0;
                        }
                        WorkerEvent::Cancelled | WorkerEvent::Error { .. } => {
                            state.building = false;
                            state.paused = false;
                        }
                        WorkerEvent::Paused => state.paused = true,
                        WorkerEvent::Resumed => state.paused = false,
                        _ => {}
                    }
                }
                let _ = inner.events.send(event);
            }

            // Event channel closed: the worker is gone.
            let (was_building, crashes, shutdown) = {
                let mut state = inner.state.lock().await;
                state.commands = None;
                if state.building {
                    state.crashes += 1;
                }
                (state.building, state.crashes, state.shutdown)
            };

            if shutdown {
                tracing::debug!("Index service shut down");
                return;
            }

            if was_building {
                if crashes >= inner.config.max_recovery_attempts {
                    tracing::error!(
                        "Build worker crashed {} consecutive times, giving up",
                        crashes
                    );
                    Self::mark_failed(
                        &inner,
                        format!("build worker crashed {crashes} times, recovery abandoned"),
                    )
                    .await;
                    let mut state = inner.state.lock().await;
                    state.building = false;
                    state.paused = false;
                } else {
                    tracing::warn!(
                        "Build worker died mid-build (crash {}/{}), recovering from checkpoint",
                        crashes,
                        inner.config.max_recovery_attempts
                    );
                    let _ = inner.events.send(WorkerEvent::WorkerRecovering);
                    tokio::time::sleep(inner.config.recovery_backoff).await;
                    inner.state.lock().await.resume_on_spawn = true;
                }
            }

            event_rx = Self::spawn_worker(&inner).await;

            let resume = {
                let mut state = inner.state.lock().await;
                std::mem::take(&mut state.resume_on_spawn)
            };
            if resume {
                let command = { inner.state.lock().await.commands.clone() };
                if let Some(command) = command {
                    let _ = command
                        .send(WorkerCommand::Build {
                            resume_from_checkpoint: true,
                        })
                        .await;
                    let _ = inner.events.send(WorkerEvent::WorkerRecovered);
                }
            }
        }
    }

    /// Persist a fatal build failure and notify listeners.
    async fn mark_failed(inner: &Arc<ServiceInner>, message: String) {
        let mut progress = inner
            .store
            .get_index_status()
            .await
            .unwrap_or_else(|_| IndexingProgress::default());
        progress.status = IndexStatus::Failed;
        progress.error = Some(message.clone());
        if let Err(e) = inner.store.update_index_status(progress).await {
            tracing::warn!("Failed to persist failure status: {}", e);
        }
        let _ = inner.events.send(WorkerEvent::Error { message });
    }

    /// Subscribe to build events. Subscribe before starting a build to
    /// observe it from the beginning.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.events.subscribe()
    }

    /// Last persisted progress snapshot.
    pub async fn status(&self) -> Result<IndexingProgress> {
        self.inner.store.get_index_status().await
    }

    /// Ask the worker for its live progress; the reply arrives as a
    /// `Status` event on the subscription.
    pub async fn request_status(&self) -> Result<()> {
        let sender = self
            .inner
            .state
            .lock()
            .await
            .commands
            .clone()
            .ok_or_else(|| QuarryError::WorkerGone("no active worker".into()))?;
        sender
            .send(WorkerCommand::GetStatus)
            .await
            .map_err(|e| QuarryError::WorkerGone(e.to_string()))?;
        Ok(())
    }

    /// Start a full build.
    ///
    /// Rejected while a build is in flight. Short-circuits to BuildComplete
    /// when the stored status is already done and no checkpoint indicates an
    /// interrupted build. Resumes from the checkpoint when one exists.
    pub async fn start_build(&self) -> Result<()> {
        #[cfg(windows)]
        {
            return Err(QuarryError::UnsupportedPlatform);
        }
        #[cfg(not(windows))]
        {
            let mut state = self.inner.state.lock().await;
            if state.building {
                return Err(QuarryError::BuildInProgress);
            }

            let status = self.inner.store.get_index_status().await?;
            let checkpoint = self.inner.store.get_checkpoint().await?;
            if status.status == IndexStatus::Done && checkpoint.is_none() {
                tracing::debug!("Index already built, short-circuiting");
                let _ = self.inner.events.send(WorkerEvent::BuildComplete);
                return Ok(());
            }

            let command = state
                .commands
                .clone()
                .ok_or_else(|| QuarryError::WorkerGone("no active worker".into()))?;
            state.building = true;
            state.paused = false;
            state.crashes = 0;
            drop(state);

            command
                .send(WorkerCommand::Build {
                    resume_from_checkpoint: checkpoint.is_some(),
                })
                .await
                .map_err(|e| QuarryError::WorkerGone(e.to_string()))?;
            Ok(())
        }
    }

    /// Apply a change set incrementally. Rejected while a build is in flight.
    pub async fn start_incremental(&self, changes: ChangeSet) -> Result<()> {
        #[cfg(windows)]
        {
            let _ = changes;
            return Err(QuarryError::UnsupportedPlatform);
        }
        #[cfg(not(windows))]
        {
            if changes.is_empty() {
                let _ = self.inner.events.send(WorkerEvent::UpdateComplete);
                return Ok(());
            }

            let mut state = self.inner.state.lock().await;
            if state.building {
                return Err(QuarryError::BuildInProgress);
            }
            let command = state
                .commands
                .clone()
                .ok_or_else(|| QuarryError::WorkerGone("no active worker".into()))?;
            state.building = true;
            state.paused = false;
            state.crashes = 0;
            drop(state);

            command
                .send(WorkerCommand::IncrementalUpdate { changes })
                .await
                .map_err(|e| QuarryError::WorkerGone(e.to_string()))?;
            Ok(())
        }
    }

    /// Pause the in-flight build. Resumable with no re-work.
    pub async fn pause(&self) -> Result<()> {
        self.forward_control(WorkerCommand::Pause, "pause", |s| s.building && !s.paused)
            .await
    }

    /// Resume a paused build from exactly where it left off.
    pub async fn resume(&self) -> Result<()> {
        self.forward_control(WorkerCommand::Resume, "resume", |s| s.building && s.paused)
            .await
    }

    /// Cancel the in-flight build; the worker stops between units of work.
    pub async fn cancel(&self) -> Result<()> {
        self.forward_control(WorkerCommand::Cancel, "cancel", |s| s.building)
            .await
    }

    async fn forward_control(
        &self,
        command: WorkerCommand,
        name: &'static str,
        valid: impl Fn(&SupervisorState) -> bool,
    ) -> Result<()> {
        let state = self.inner.state.lock().await;
        if !valid(&state) {
            return Err(QuarryError::InvalidBuildState(name));
        }
        let sender = state
            .commands
            .clone()
            .ok_or_else(|| QuarryError::WorkerGone("no active worker".into()))?;
        drop(state);
        sender
            .send(command)
            .await
            .map_err(|e| QuarryError::WorkerGone(e.to_string()))?;
        Ok(())
    }

    /// One drift-detection cycle: skipped while a build is running; otherwise
    /// branch check + scan diff, and an automatic incremental update when the
    /// repository drifted. Returns true when an update was started.
    pub async fn poll_once(&self) -> Result<bool> {
        if self.inner.state.lock().await.building {
            tracing::debug!("Poll skipped: build in progress");
            return Ok(false);
        }

        // A branch switch is just a large change set; the diff below picks
        // the file-level consequences up.
        let switched = self.inner.branch.lock().await.check();

        let root = self.inner.root.clone();
        let scanned =
            tokio::task::spawn_blocking(move || FileScanner::new(root).scan()).await??;
        let stored = self.inner.store.get_all_file_meta().await?;
        let changes = detect_changes(&scanned, &stored);

        if changes.is_empty() {
            return Ok(false);
        }

        tracing::info!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            branch_switched = switched,
            "Repository drift detected, starting incremental update"
        );
        self.start_incremental(changes).await?;
        Ok(true)
    }

    /// Spawn the periodic poll loop. Returns a shutdown sender; send true to
    /// stop the loop.
    pub fn spawn_poll_loop(&self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let service = self.clone();

        tokio::spawn(async move {
            let period = service.inner.config.poll_interval;
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = service.poll_once().await {
                            tracing::warn!("Drift poll failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Poll loop shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Stop the service: the worker exits once its command channel drops.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.shutdown = true;
        state.commands = None;
    }
}
