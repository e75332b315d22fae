// src/detector.rs
// Change detection: diff a fresh scan against stored file metadata

use crate::types::{ChangeSet, FileMetadata};
use std::collections::HashMap;

/// Diff a fresh scanner pass against the store's view of the repository.
///
/// A file is "added" if unseen, "modified" if its content hash differs,
/// "deleted" if stored but no longer scanned. A branch switch is just a
/// large instance of this, not a separate state machine.
pub fn detect_changes(scanned: &[FileMetadata], stored: &[FileMetadata]) -> ChangeSet {
    let stored_by_path: HashMap<&str, &FileMetadata> =
        stored.iter().map(|f| (f.path.as_str(), f)).collect();

    let mut changes = ChangeSet::default();

    for file in scanned {
        match stored_by_path.get(file.path.as_str()) {
            None => changes.added.push(file.path.clone()),
            Some(existing) if existing.content_hash != file.content_hash => {
                changes.modified.push(file.path.clone());
            }
            Some(_) => {}
        }
    }

    let scanned_paths: HashMap<&str, ()> =
        scanned.iter().map(|f| (f.path.as_str(), ())).collect();
    for file in stored {
        if !scanned_paths.contains_key(file.path.as_str()) {
            changes.deleted.push(file.path.clone());
        }
    }

    changes
}
