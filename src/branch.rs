// src/branch.rs
// Version-control branch tracking using git2

use git2::Repository;
use std::path::{Path, PathBuf};

/// Callback invoked with (previous_branch, current_branch) on a switch.
pub type BranchSwitchCallback = Box<dyn Fn(Option<&str>, &str) + Send + Sync>;

/// Get the current git branch for a project path.
///
/// Repository::discover walks up the directory tree, which handles worktrees
/// and submodules. Detached HEAD is normalized to "detached" to avoid
/// ephemeral SHA clutter. Returns None outside a repository or when the
/// repository has no HEAD yet.
pub fn current_branch(project_path: &Path) -> Option<String> {
    let repo = Repository::discover(project_path).ok()?;

    if repo.head_detached().unwrap_or(false) {
        return Some("detached".to_string());
    }

    let head = repo.head().ok()?;
    head.shorthand().map(|s| s.to_string())
}

/// Tracks the checked-out branch and fires a callback on switches.
///
/// The handler is deliberately not a state machine: a branch switch is
/// treated as "many files changed at once", and the callback's job is to
/// trigger ordinary change detection.
pub struct BranchHandler {
    project_path: PathBuf,
    last_branch: Option<String>,
    callback: Option<BranchSwitchCallback>,
}

impl BranchHandler {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        let project_path = project_path.into();
        let last_branch = current_branch(&project_path);
        Self {
            project_path,
            last_branch,
            callback: None,
        }
    }

    /// Register the switch callback.
    pub fn on_switch(&mut self, callback: BranchSwitchCallback) {
        self.callback = Some(callback);
    }

    /// Branch seen at the last check.
    pub fn last_branch(&self) -> Option<&str> {
        self.last_branch.as_deref()
    }

    /// Re-read the branch; on a change, invoke the callback and return true.
    pub fn check(&mut self) -> bool {
        let current = current_branch(&self.project_path);
        let Some(current) = current else {
            // Left (or never was in) a repository; nothing to signal.
            return false;
        };

        if self.last_branch.as_deref() == Some(current.as_str()) {
            return false;
        }

        let previous = self.last_branch.take();
        tracing::info!(
            previous = previous.as_deref().unwrap_or("<none>"),
            current = %current,
            "Branch switch detected"
        );
        if let Some(ref callback) = self.callback {
            callback(previous.as_deref(), &current);
        }
        self.last_branch = Some(current);
        true
    }
}
