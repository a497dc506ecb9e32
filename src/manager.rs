use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::{DiffToolChoice, ReviewConfig};
use crate::diff::{BuiltinDiff, DiffTool, GitDiffTool, build_hunks};
use crate::editor::DocumentSync;
use crate::files::{DiskFs, FileSystem, normalize_path};
use crate::history::UndoHistory;
use crate::logging::ChangeLog;
use crate::review::{ChangeType, FileReview, ReviewSnapshot};
use crate::source::{GitHistory, HookSnapshots, NoHistory, SnapshotSource, VersionControl};
use crate::store::{SaveDebouncer, clear_review_state, load_review_state, save_review_state};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Everything the manager talks to outside its own state.
pub struct Collaborators {
    pub fs: Box<dyn FileSystem>,
    pub snapshots: Box<dyn SnapshotSource>,
    pub vcs: Box<dyn VersionControl>,
    pub diff_tool: Box<dyn DiffTool>,
    pub editor: Option<Box<dyn DocumentSync>>,
}

impl Collaborators {
    /// Real disk, git-backed history and diff per `config`, no editor.
    /// The returned snapshot table is shared with the manager so hook
    /// handlers can record pre-edit content into it.
    pub fn for_workspace(root: &Path, config: &ReviewConfig) -> (Self, HookSnapshots) {
        let snapshots = HookSnapshots::new();
        let vcs: Box<dyn VersionControl> = if config.use_git_history {
            Box::new(GitHistory::new(root))
        } else {
            Box::new(NoHistory)
        };
        let diff_tool: Box<dyn DiffTool> = match config.diff_tool {
            DiffToolChoice::Builtin => Box::new(BuiltinDiff),
            DiffToolChoice::Git => Box::new(GitDiffTool::new(config.state_dir_in(root))),
        };
        let collaborators = Self {
            fs: Box::new(DiskFs),
            snapshots: Box::new(snapshots.clone()),
            vcs,
            diff_tool,
            editor: None,
        };
        (collaborators, snapshots)
    }
}

type StateListener = Box<dyn FnMut(bool)>;

/// Owns the set of files under review and every transition they go through.
///
/// Reviews are kept in the order they were added; the file cursor indexes
/// into that order and the hunk cursor into the current file's hunks.
pub struct ReviewManager {
    root: PathBuf,
    state_dir: PathBuf,
    fs: Box<dyn FileSystem>,
    snapshots: Box<dyn SnapshotSource>,
    vcs: Box<dyn VersionControl>,
    diff_tool: Box<dyn DiffTool>,
    editor: Option<Box<dyn DocumentSync>>,
    reviews: Vec<FileReview>,
    current_file: usize,
    current_hunk: usize,
    history: UndoHistory,
    save_timer: SaveDebouncer,
    change_log: ChangeLog,
    listeners: Vec<StateListener>,
    disposed: bool,
}

impl ReviewManager {
    pub fn new(
        root: impl Into<PathBuf>,
        config: &ReviewConfig,
        collaborators: Collaborators,
    ) -> Self {
        let root = root.into();
        let state_dir = config.state_dir_in(&root);
        let change_log = ChangeLog::new(&state_dir, config.max_log_entries, config.log_changes);
        Self {
            root,
            state_dir,
            fs: collaborators.fs,
            snapshots: collaborators.snapshots,
            vcs: collaborators.vcs,
            diff_tool: collaborators.diff_tool,
            editor: collaborators.editor,
            reviews: Vec::new(),
            current_file: 0,
            current_hunk: 0,
            history: UndoHistory::new(),
            save_timer: SaveDebouncer::new(config.save_debounce()),
            change_log,
            listeners: Vec::new(),
            disposed: false,
        }
    }

    pub fn for_workspace(root: impl Into<PathBuf>, config: &ReviewConfig) -> (Self, HookSnapshots) {
        let root = root.into();
        let (collaborators, snapshots) = Collaborators::for_workspace(&root, config);
        (Self::new(root, config, collaborators), snapshots)
    }

    pub fn set_editor(&mut self, editor: Box<dyn DocumentSync>) {
        self.editor = Some(editor);
    }

    /// Registers a callback fired with `true` whenever a file is added for
    /// review and `false` when the last review leaves.
    pub fn on_state_changed(&mut self, listener: impl FnMut(bool) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    pub fn history(&self) -> &UndoHistory {
        &self.history
    }

    pub fn reviews(&self) -> &[FileReview] {
        &self.reviews
    }

    pub fn get_review(&self, path: &Path) -> Option<&FileReview> {
        let path = self.resolve_path(path);
        self.reviews.iter().find(|r| r.file_path == path)
    }

    pub fn current_review(&self) -> Option<&FileReview> {
        self.reviews.get(self.current_file)
    }

    pub fn get_unresolved_files(&self) -> Vec<PathBuf> {
        self.reviews
            .iter()
            .filter(|r| r.unresolved_count() > 0)
            .map(|r| r.file_path.clone())
            .collect()
    }

    pub fn has_active_review(&self) -> bool {
        !self.reviews.is_empty()
    }

    pub fn current_file_index(&self) -> usize {
        self.current_file
    }

    pub fn current_hunk_index(&self) -> usize {
        self.current_hunk
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        normalize_path(&self.root, path)
    }

    fn position(&self, path: &Path) -> Option<usize> {
        self.reviews.iter().position(|r| r.file_path == path)
    }

    /// Starts (or replaces) the review of a file the agent just touched.
    ///
    /// Returns `Ok(false)` when there is nothing to review: the content is
    /// unchanged, binary, or no pre-edit content can be found for a file that
    /// no longer exists.
    pub fn add_file(&mut self, path: &Path) -> Result<bool> {
        let path = self.resolve_path(path);
        let current = if self.fs.exists(&path) {
            match self.fs.read_to_string(&path) {
                Ok(text) => Some(text),
                Err(err) => {
                    eprintln!("skipping {}: {err:#}", path.display());
                    return Ok(false);
                }
            }
        } else {
            None
        };
        let original = self
            .snapshots
            .snapshot(&path)
            .or_else(|| self.vcs.read_original(&path).ok());

        let (change_type, original_content, modified_content) = match (original, current) {
            (Some(original), Some(current)) => (ChangeType::Edit, original, current),
            (None, Some(current)) => (ChangeType::Create, String::new(), current),
            (Some(original), None) => (ChangeType::Delete, original, String::new()),
            (None, None) => return Ok(false),
        };

        let hunks = build_hunks(self.diff_tool.as_ref(), &original_content, &modified_content);
        if hunks.is_empty() {
            self.remove_review(&path);
            return Ok(false);
        }

        let review = FileReview::new(
            path.clone(),
            original_content,
            modified_content,
            change_type,
            hunks,
        );
        match self.position(&path) {
            Some(idx) => {
                self.reviews[idx] = review;
                if idx == self.current_file {
                    self.current_hunk = 0;
                }
            }
            None => self.reviews.push(review),
        }
        self.history.reset(&path);
        self.schedule_save();
        self.notify(true);
        Ok(true)
    }

    /// Drops a review without touching the file on disk.
    pub fn remove_review(&mut self, path: &Path) -> bool {
        let path = self.resolve_path(path);
        let Some(idx) = self.position(&path) else {
            return false;
        };
        self.reviews.remove(idx);
        self.history.forget(&path);
        self.after_removal(idx);
        true
    }

    /// Accepts or rejects one pending hunk.
    ///
    /// `Ok(false)` means nothing happened (unknown file or hunk, or the hunk
    /// was already resolved). An error means the file was fully resolved but
    /// its final content could not be written; the review stays active.
    pub fn resolve_hunk(&mut self, path: &Path, hunk_id: usize, accept: bool) -> Result<bool> {
        let path = self.resolve_path(path);
        let Some(idx) = self.position(&path) else {
            return Ok(false);
        };
        match self.reviews[idx].hunk(hunk_id) {
            Some(hunk) if !hunk.resolved => {}
            _ => return Ok(false),
        }
        let before = self.reviews[idx].snapshot();
        self.reviews[idx].resolve(hunk_id, accept);
        self.history.record(before, false);
        self.settle(idx)?;
        Ok(true)
    }

    /// Resolves every pending hunk of a file the same way, then finalizes it.
    pub fn resolve_all_hunks(&mut self, path: &Path, accept: bool) -> Result<bool> {
        let path = self.resolve_path(path);
        let Some(idx) = self.position(&path) else {
            return Ok(false);
        };
        if self.reviews[idx].unresolved_count() == 0 {
            return Ok(false);
        }
        let before = self.reviews[idx].snapshot();
        self.reviews[idx].resolve_all(accept);
        self.history.record(before, false);
        self.settle(idx)?;
        Ok(true)
    }

    /// Retries the disk write for a review whose hunks are all resolved.
    pub fn finalize(&mut self, path: &Path) -> Result<bool> {
        let path = self.resolve_path(path);
        let Some(idx) = self.position(&path) else {
            return Ok(false);
        };
        if !self.reviews[idx].is_fully_resolved() {
            return Ok(false);
        }
        self.finalize_at(idx)?;
        Ok(true)
    }

    fn settle(&mut self, idx: usize) -> Result<()> {
        if self.reviews[idx].is_fully_resolved() {
            return self.finalize_at(idx);
        }
        if idx == self.current_file {
            self.current_hunk = self.reviews[idx].first_unresolved().unwrap_or(0);
        }
        self.sync_document(idx);
        self.schedule_save();
        Ok(())
    }

    /// Applies a fully resolved review to disk and drops it from the active
    /// set. The disk write happens first so a failure leaves the review in
    /// place.
    fn finalize_at(&mut self, idx: usize) -> Result<()> {
        let review = &self.reviews[idx];
        let path = review.file_path.clone();
        let change_type = review.change_type;
        let any_accepted = review.accepted_count() > 0;
        let summary = review.summary();

        let action = match (change_type, any_accepted) {
            (ChangeType::Delete, true) | (ChangeType::Create, false) => {
                self.fs
                    .remove(&path)
                    .with_context(|| format!("finalizing review of {}", path.display()))?;
                "delete"
            }
            (ChangeType::Delete, false) => {
                let original = review.original_content.clone();
                self.push_to_editor(&path, &original);
                self.fs
                    .write(&path, &original)
                    .with_context(|| format!("finalizing review of {}", path.display()))?;
                "restore"
            }
            (ChangeType::Edit, _) | (ChangeType::Create, true) => {
                let text = review.merged_text();
                self.push_to_editor(&path, &text);
                self.fs
                    .write(&path, &text)
                    .with_context(|| format!("finalizing review of {}", path.display()))?;
                "write"
            }
        };
        if let Err(err) = self.change_log.record("finalize", &path, action, &summary) {
            eprintln!("warning: failed to record change for {}: {err:#}", path.display());
        }

        let review = self.reviews.remove(idx);
        self.history.mark_finalized(review.snapshot());
        self.snapshots.release(&path);
        self.after_removal(idx);
        Ok(())
    }

    fn after_removal(&mut self, idx: usize) {
        if self.reviews.is_empty() {
            self.current_file = 0;
            self.current_hunk = 0;
            self.save_timer.cancel();
            clear_review_state(&self.state_dir);
            self.notify(false);
            return;
        }
        if self.current_file > idx {
            self.current_file -= 1;
        } else if self.current_file >= self.reviews.len() {
            self.current_file = 0;
        }
        self.current_hunk = self.reviews[self.current_file]
            .first_unresolved()
            .unwrap_or(0);
        self.schedule_save();
    }

    /// Points the cursor at `path` and brings the editor's document in line
    /// with the review buffer.
    pub fn open_file_for_review(&mut self, path: &Path) -> bool {
        let path = self.resolve_path(path);
        let Some(idx) = self.position(&path) else {
            return false;
        };
        self.current_file = idx;
        self.current_hunk = self.reviews[idx].first_unresolved().unwrap_or(0);
        self.sync_document(idx);
        self.reveal_current_hunk();
        true
    }

    pub fn navigate_file(&mut self, direction: Direction) -> bool {
        let len = self.reviews.len();
        if len == 0 {
            return false;
        }
        let current = self.current_file.min(len - 1);
        let target = match direction {
            Direction::Next => (current + 1) % len,
            Direction::Previous => (current + len - 1) % len,
        };
        let path = self.reviews[target].file_path.clone();
        self.open_file_for_review(&path)
    }

    /// Moves the hunk cursor to the next/previous pending hunk of the current
    /// file, wrapping at either end.
    pub fn navigate_hunk(&mut self, direction: Direction) -> bool {
        let Some(review) = self.reviews.get(self.current_file) else {
            return false;
        };
        let pending: Vec<usize> = review
            .hunks
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.resolved)
            .map(|(idx, _)| idx)
            .collect();
        let (Some(&first), Some(&last)) = (pending.first(), pending.last()) else {
            return false;
        };
        let current = self.current_hunk;
        self.current_hunk = match direction {
            Direction::Next => pending.iter().copied().find(|&i| i > current).unwrap_or(first),
            Direction::Previous => pending
                .iter()
                .rev()
                .copied()
                .find(|&i| i < current)
                .unwrap_or(last),
        };
        self.reveal_current_hunk();
        true
    }

    /// Opens the next file with pending hunks after the current one,
    /// wrapping around; falls back to reopening the current file.
    pub fn review_next_unresolved(&mut self) -> bool {
        let len = self.reviews.len();
        for step in 1..=len {
            let idx = (self.current_file + step) % len;
            if self.reviews[idx].unresolved_count() > 0 {
                let path = self.reviews[idx].file_path.clone();
                return self.open_file_for_review(&path);
            }
        }
        false
    }

    /// Opens the file under the cursor if it still has pending hunks,
    /// otherwise the first file that does.
    pub fn open_current_or_next(&mut self) -> bool {
        let target = self
            .reviews
            .get(self.current_file)
            .filter(|r| r.unresolved_count() > 0)
            .or_else(|| self.reviews.iter().find(|r| r.unresolved_count() > 0))
            .map(|r| r.file_path.clone());
        match target {
            Some(path) => self.open_file_for_review(&path),
            None => false,
        }
    }

    fn active_path(&self) -> Option<PathBuf> {
        match &self.editor {
            Some(editor) => editor.active_path(),
            None => self.reviews.get(self.current_file).map(|r| r.file_path.clone()),
        }
    }

    fn document_open(&self, path: &Path) -> bool {
        self.editor
            .as_ref()
            .is_none_or(|editor| editor.document_text(path).is_some())
    }

    /// Current state of `path` for the opposite stack: the live review, or
    /// the parked final state if it was finalized.
    fn take_current_state(&mut self, path: &Path) -> Option<ReviewSnapshot> {
        match self.position(path) {
            Some(idx) => Some(self.reviews[idx].snapshot()),
            None => self.history.take_finalized(path),
        }
    }

    /// Steps the active file (or the last file resolved) one resolution back.
    /// A finalized review is brought back into the active set.
    pub fn undo_resolve(&mut self) -> bool {
        let active = self.active_path();
        let Some(target) = self.history.undo_target(active.as_deref()) else {
            return false;
        };
        if !self.document_open(&target) {
            return false;
        }
        let Some(snapshot) = self.history.pop_undo(&target) else {
            return false;
        };
        if let Some(state) = self.take_current_state(&target) {
            self.history.push_redo(state);
        }
        self.restore_from_snapshot(snapshot);
        true
    }

    /// Re-applies the last undone resolution; finalizes again when that
    /// brings the file back to fully resolved.
    pub fn redo_resolve(&mut self) -> Result<bool> {
        let active = self.active_path();
        let Some(target) = self.history.redo_target(active.as_deref()) else {
            return Ok(false);
        };
        if !self.document_open(&target) {
            return Ok(false);
        }
        let Some(snapshot) = self.history.pop_redo(&target) else {
            return Ok(false);
        };
        if let Some(state) = self.take_current_state(&target) {
            self.history.record(state, true);
        }
        let fully_resolved = snapshot.is_fully_resolved();
        self.restore_from_snapshot(snapshot);
        if fully_resolved {
            if let Some(idx) = self.position(&target) {
                self.finalize_at(idx)?;
            }
        }
        Ok(true)
    }

    /// Replaces a review's state with `snapshot`, re-creating the review if
    /// it had been finalized.
    pub fn restore_from_snapshot(&mut self, snapshot: ReviewSnapshot) {
        let path = snapshot.file_path.clone();
        let fully_resolved = snapshot.is_fully_resolved();
        let idx = match self.position(&path) {
            Some(idx) => {
                self.reviews[idx].apply_snapshot(snapshot);
                idx
            }
            None => {
                let was_empty = self.reviews.is_empty();
                self.reviews.push(FileReview::from_snapshot(snapshot));
                if was_empty {
                    self.notify(true);
                }
                self.reviews.len() - 1
            }
        };
        if !fully_resolved {
            self.current_file = idx;
            self.current_hunk = self.reviews[idx].first_unresolved().unwrap_or(0);
            self.sync_document(idx);
        }
        self.schedule_save();
    }

    /// Reloads reviews saved by a previous process. Reviews of files that
    /// vanished are dropped, except deletions, whose file is expected to be
    /// gone.
    pub fn restore(&mut self) -> bool {
        let Some(state) = load_review_state(&self.state_dir) else {
            return false;
        };
        let saved_current = state
            .files
            .get(state.current_file_index)
            .map(|file| file.file_path.clone());
        let mut restored = 0usize;
        for file in state.files {
            let keep = file.change_type == ChangeType::Delete || self.fs.exists(&file.file_path);
            let pending = file.hunks.iter().any(|h| !h.resolved);
            if !keep || !pending {
                continue;
            }
            let review = file.into_review();
            let path = review.file_path.clone();
            match self.position(&path) {
                Some(idx) => self.reviews[idx] = review,
                None => self.reviews.push(review),
            }
            self.history.reset(&path);
            restored += 1;
        }
        self.current_file = saved_current
            .and_then(|path| self.position(&path))
            .unwrap_or(0);
        self.current_hunk = self
            .reviews
            .get(self.current_file)
            .and_then(FileReview::first_unresolved)
            .unwrap_or(0);
        if restored > 0 {
            self.notify(true);
        }
        restored > 0
    }

    pub fn schedule_save(&mut self) {
        self.save_timer.schedule(Instant::now());
    }

    pub fn has_pending_save(&self) -> bool {
        self.save_timer.is_pending()
    }

    /// Saves if the debounce deadline has passed; returns whether it did.
    pub fn poll_save(&mut self, now: Instant) -> bool {
        if self.save_timer.take_due(now) {
            self.save_now()
        } else {
            false
        }
    }

    pub fn save_now(&mut self) -> bool {
        self.save_timer.cancel();
        if self.reviews.is_empty() {
            clear_review_state(&self.state_dir)
        } else {
            save_review_state(&self.state_dir, &self.reviews, self.current_file)
        }
    }

    /// Puts the agent's version of every reviewed file back on disk, saves
    /// the review set for the next start, and releases the manager.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        let mut first_error = None;
        for review in &self.reviews {
            let path = &review.file_path;
            let outcome = match review.change_type {
                ChangeType::Delete => self.fs.remove(path),
                ChangeType::Edit | ChangeType::Create => {
                    self.fs.write(path, &review.modified_content)
                }
            };
            match outcome {
                Ok(()) => {
                    if let Err(err) =
                        self.change_log.record("dispose", path, "restore", &review.summary())
                    {
                        eprintln!("warning: failed to record change for {}: {err:#}", path.display());
                    }
                }
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err.context(format!(
                            "restoring agent content of {}",
                            path.display()
                        )));
                    }
                }
            }
        }
        self.save_now();
        self.reviews.clear();
        self.listeners.clear();
        self.editor = None;
        self.disposed = true;
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn notify(&mut self, active: bool) {
        for listener in self.listeners.iter_mut() {
            listener(active);
        }
    }

    fn sync_document(&mut self, idx: usize) {
        let Some(editor) = self.editor.as_mut() else {
            return;
        };
        let review = &self.reviews[idx];
        let text = review.merged_text();
        if editor
            .document_text(&review.file_path)
            .is_some_and(|current| current != text)
        {
            if let Err(err) = editor.apply_edit(&review.file_path, &text) {
                eprintln!("warning: failed to sync {}: {err:#}", review.file_path.display());
            }
        }
        editor.apply_decorations(review);
    }

    fn push_to_editor(&mut self, path: &Path, text: &str) {
        let Some(editor) = self.editor.as_mut() else {
            return;
        };
        if editor.document_text(path).is_some_and(|current| current != text) {
            if let Err(err) = editor.apply_edit(path, text) {
                eprintln!("warning: failed to sync {}: {err:#}", path.display());
            }
        }
    }

    fn reveal_current_hunk(&mut self) {
        let Some(editor) = self.editor.as_mut() else {
            return;
        };
        let Some(review) = self.reviews.get(self.current_file) else {
            return;
        };
        if let Some(range) = review.hunk_ranges.get(self.current_hunk) {
            editor.reveal(&review.file_path, range);
        }
    }
}
