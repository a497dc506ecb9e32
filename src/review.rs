use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diff::{Hunk, owned_lines};
use crate::merge::{HunkRange, build_merged_content};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Edit,
    Create,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeType::Edit => "edit",
            ChangeType::Create => "create",
            ChangeType::Delete => "delete",
        };
        f.pad(label)
    }
}

/// One file under review.
///
/// `merged_lines` and `hunk_ranges` are derived from the hunks and the
/// modified text; every mutation goes through [`FileReview::rebuild`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReview {
    pub file_path: PathBuf,
    pub original_content: String,
    pub modified_content: String,
    pub change_type: ChangeType,
    pub hunks: Vec<Hunk>,
    pub merged_lines: Vec<String>,
    pub hunk_ranges: Vec<HunkRange>,
}

impl FileReview {
    pub fn new(
        file_path: PathBuf,
        original_content: String,
        modified_content: String,
        change_type: ChangeType,
        hunks: Vec<Hunk>,
    ) -> Self {
        let mut review = Self {
            file_path,
            original_content,
            modified_content,
            change_type,
            hunks,
            merged_lines: Vec::new(),
            hunk_ranges: Vec::new(),
        };
        review.rebuild();
        review
    }

    pub fn rebuild(&mut self) {
        let modified = owned_lines(&self.modified_content);
        let merged = build_merged_content(&modified, &self.hunks);
        self.merged_lines = merged.lines;
        self.hunk_ranges = merged.ranges;
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn unresolved_count(&self) -> usize {
        self.hunks.iter().filter(|h| !h.resolved).count()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.hunks.iter().all(|h| h.resolved)
    }

    pub fn accepted_count(&self) -> usize {
        self.hunks.iter().filter(|h| h.resolved && h.accepted).count()
    }

    pub fn rejected_count(&self) -> usize {
        self.hunks.iter().filter(|h| h.resolved && !h.accepted).count()
    }

    pub fn hunk(&self, hunk_id: usize) -> Option<&Hunk> {
        self.hunks.iter().find(|h| h.id == hunk_id)
    }

    pub fn range_for(&self, hunk_id: usize) -> Option<&HunkRange> {
        self.hunk_ranges.iter().find(|r| r.hunk_id == hunk_id)
    }

    /// Index into `hunks` of the first pending hunk.
    pub fn first_unresolved(&self) -> Option<usize> {
        self.hunks.iter().position(|h| !h.resolved)
    }

    pub fn merged_text(&self) -> String {
        self.merged_lines.join("\n")
    }

    /// Marks one pending hunk; returns false when the hunk is unknown or
    /// already resolved.
    pub fn resolve(&mut self, hunk_id: usize, accept: bool) -> bool {
        let Some(hunk) = self.hunks.iter_mut().find(|h| h.id == hunk_id) else {
            return false;
        };
        if hunk.resolved {
            return false;
        }
        hunk.resolved = true;
        hunk.accepted = accept;
        self.rebuild();
        true
    }

    /// Resolves every pending hunk the same way; returns how many changed.
    pub fn resolve_all(&mut self, accept: bool) -> usize {
        let mut changed = 0usize;
        for hunk in self.hunks.iter_mut().filter(|h| !h.resolved) {
            hunk.resolved = true;
            hunk.accepted = accept;
            changed += 1;
        }
        if changed > 0 {
            self.rebuild();
        }
        changed
    }

    pub fn snapshot(&self) -> ReviewSnapshot {
        ReviewSnapshot {
            file_path: self.file_path.clone(),
            original_content: self.original_content.clone(),
            modified_content: self.modified_content.clone(),
            change_type: self.change_type,
            hunks: self.hunks.clone(),
            merged_lines: self.merged_lines.clone(),
            hunk_ranges: self.hunk_ranges.clone(),
        }
    }

    /// Replaces this review's state with `snapshot`, verbatim.
    pub fn apply_snapshot(&mut self, snapshot: ReviewSnapshot) {
        self.original_content = snapshot.original_content;
        self.modified_content = snapshot.modified_content;
        self.change_type = snapshot.change_type;
        self.hunks = snapshot.hunks;
        self.merged_lines = snapshot.merged_lines;
        self.hunk_ranges = snapshot.hunk_ranges;
    }

    pub fn from_snapshot(snapshot: ReviewSnapshot) -> Self {
        Self {
            file_path: snapshot.file_path,
            original_content: snapshot.original_content,
            modified_content: snapshot.modified_content,
            change_type: snapshot.change_type,
            hunks: snapshot.hunks,
            merged_lines: snapshot.merged_lines,
            hunk_ranges: snapshot.hunk_ranges,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} accepted, {} rejected",
            self.accepted_count(),
            self.rejected_count()
        )
    }
}

/// Independent copy of a review at one point in time; the unit of undo/redo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSnapshot {
    pub file_path: PathBuf,
    pub original_content: String,
    pub modified_content: String,
    pub change_type: ChangeType,
    pub hunks: Vec<Hunk>,
    pub merged_lines: Vec<String>,
    pub hunk_ranges: Vec<HunkRange>,
}

impl ReviewSnapshot {
    pub fn is_fully_resolved(&self) -> bool {
        self.hunks.iter().all(|h| h.resolved)
    }
}
