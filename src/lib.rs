//! Review engine for edits made by a coding agent.
//!
//! Every file the agent touches becomes a [`FileReview`]: a set of line hunks
//! against the file's pre-edit content, blended into a single merge buffer
//! that the user resolves hunk by hunk. [`ReviewManager`] drives the whole
//! lifecycle (undo/redo, persistence across restarts, final disk writes).

pub mod config;
pub mod diff;
pub mod editor;
pub mod files;
pub mod history;
pub mod inline;
pub mod logging;
pub mod manager;
pub mod merge;
pub mod patch;
pub mod render;
pub mod review;
pub mod source;
pub mod store;

pub use config::{DiffToolChoice, ReviewConfig};
pub use diff::{BuiltinDiff, DiffTool, GitDiffTool, Hunk, build_hunks, compute_hunks};
pub use editor::DocumentSync;
pub use files::{DiskFs, FileSystem};
pub use history::UndoHistory;
pub use inline::{InlineDiff, InlineSegment, inline_diff};
pub use manager::{Collaborators, Direction, ReviewManager};
pub use merge::{HunkRange, MergedContent, build_merged_content};
pub use review::{ChangeType, FileReview, ReviewSnapshot};
pub use source::{DirSnapshots, GitHistory, HookSnapshots, NoHistory, SnapshotSource, VersionControl};
pub use store::{PersistedReviewState, SaveDebouncer};
