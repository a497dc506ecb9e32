use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::merge::HunkRange;
use crate::review::FileReview;

/// The editor surface that displays review buffers.
///
/// The engine only pushes state into it: buffer text, decorations, and the
/// hunk to bring into view.
pub trait DocumentSync {
    /// Path of the document in the focused editor, if any.
    fn active_path(&self) -> Option<PathBuf>;
    /// Current text of the open document for `path`.
    fn document_text(&self, path: &Path) -> Option<String>;
    /// Replaces the whole document with `text` and saves it without formatting.
    fn apply_edit(&mut self, path: &Path, text: &str) -> Result<()>;
    fn apply_decorations(&mut self, review: &FileReview);
    fn reveal(&mut self, _path: &Path, _range: &HunkRange) {}
}
