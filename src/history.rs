use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::review::ReviewSnapshot;

const MAX_DEPTH: usize = 200;

#[derive(Debug, Default)]
struct FileHistory {
    undo: Vec<ReviewSnapshot>,
    redo: Vec<ReviewSnapshot>,
}

/// Per-file undo/redo stacks of whole-review snapshots.
///
/// Stacks outlive the review they belong to: once a file is finalized its
/// last state is parked in `finalized`, and `last_undo_path`/`last_redo_path`
/// let an undo issued from anywhere bring the review back.
#[derive(Debug, Default)]
pub struct UndoHistory {
    files: HashMap<PathBuf, FileHistory>,
    finalized: HashMap<PathBuf, ReviewSnapshot>,
    last_undo_path: Option<PathBuf>,
    last_redo_path: Option<PathBuf>,
}

impl UndoHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh history for a newly added review.
    pub fn reset(&mut self, path: &Path) {
        self.files.insert(path.to_path_buf(), FileHistory::default());
        self.finalized.remove(path);
    }

    /// Drops all history for `path`.
    pub fn forget(&mut self, path: &Path) {
        self.files.remove(path);
        self.finalized.remove(path);
        if self.last_undo_path.as_deref() == Some(path) {
            self.last_undo_path = None;
        }
        if self.last_redo_path.as_deref() == Some(path) {
            self.last_redo_path = None;
        }
    }

    /// Pushes the state from before a mutation. The redo chain is cleared
    /// unless `preserve_redo` is set (used while replaying a redo).
    pub fn record(&mut self, snapshot: ReviewSnapshot, preserve_redo: bool) {
        let path = snapshot.file_path.clone();
        let entry = self.files.entry(path.clone()).or_default();
        push_bounded(&mut entry.undo, snapshot);
        if !preserve_redo {
            entry.redo.clear();
        }
        self.last_undo_path = Some(path);
    }

    pub fn push_redo(&mut self, snapshot: ReviewSnapshot) {
        let path = snapshot.file_path.clone();
        let entry = self.files.entry(path.clone()).or_default();
        push_bounded(&mut entry.redo, snapshot);
        self.last_redo_path = Some(path);
    }

    pub fn pop_undo(&mut self, path: &Path) -> Option<ReviewSnapshot> {
        self.files.get_mut(path)?.undo.pop()
    }

    pub fn pop_redo(&mut self, path: &Path) -> Option<ReviewSnapshot> {
        self.files.get_mut(path)?.redo.pop()
    }

    pub fn can_undo(&self, path: &Path) -> bool {
        self.files.get(path).is_some_and(|h| !h.undo.is_empty())
    }

    pub fn can_redo(&self, path: &Path) -> bool {
        self.files.get(path).is_some_and(|h| !h.redo.is_empty())
    }

    pub fn undo_depth(&self, path: &Path) -> usize {
        self.files.get(path).map_or(0, |h| h.undo.len())
    }

    pub fn redo_depth(&self, path: &Path) -> usize {
        self.files.get(path).map_or(0, |h| h.redo.len())
    }

    /// The file an undo should act on: the active file when it has history,
    /// otherwise the file most recently recorded.
    pub fn undo_target(&self, active: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = active.filter(|p| self.can_undo(p)) {
            return Some(path.to_path_buf());
        }
        self.last_undo_path
            .as_deref()
            .filter(|p| self.can_undo(p))
            .map(Path::to_path_buf)
    }

    pub fn redo_target(&self, active: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = active.filter(|p| self.can_redo(p)) {
            return Some(path.to_path_buf());
        }
        self.last_redo_path
            .as_deref()
            .filter(|p| self.can_redo(p))
            .map(Path::to_path_buf)
    }

    /// Parks the final state of a review that just left the active set.
    pub fn mark_finalized(&mut self, snapshot: ReviewSnapshot) {
        self.finalized.insert(snapshot.file_path.clone(), snapshot);
    }

    pub fn take_finalized(&mut self, path: &Path) -> Option<ReviewSnapshot> {
        self.finalized.remove(path)
    }

    pub fn is_finalized(&self, path: &Path) -> bool {
        self.finalized.contains_key(path)
    }
}

fn push_bounded(stack: &mut Vec<ReviewSnapshot>, snapshot: ReviewSnapshot) {
    if stack.len() >= MAX_DEPTH {
        stack.remove(0);
    }
    stack.push(snapshot);
}
