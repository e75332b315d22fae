// src/build/protocol.rs
// Build control protocol between the supervisor and the build worker
//
// The worker owns all mutable build state; the supervisor owns only the
// last-known progress snapshot and the retry counter. Everything crosses
// this boundary as messages, never as shared memory.

use crate::types::{ChangeSet, IndexingProgress};

/// Commands the supervisor sends to the build worker.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Run a full build; optionally resume from a stored checkpoint.
    Build { resume_from_checkpoint: bool },
    /// Apply a pre-computed change set incrementally.
    IncrementalUpdate { changes: ChangeSet },
    Pause,
    Resume,
    Cancel,
    GetStatus,
}

/// Events the worker (and supervisor, for recovery) emits to listeners.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Progress(IndexingProgress),
    BuildComplete,
    UpdateComplete,
    Paused,
    Resumed,
    Cancelled,
    Status(IndexingProgress),
    Error { message: String },
    /// Supervisor noticed a crashed worker and is about to respawn it.
    WorkerRecovering,
    /// Replacement worker is running and resuming from the checkpoint.
    WorkerRecovered,
}

impl WorkerEvent {
    /// True for events that end an in-flight build.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::BuildComplete
                | WorkerEvent::UpdateComplete
                | WorkerEvent::Cancelled
                | WorkerEvent::Error { .. }
        )
    }
}
