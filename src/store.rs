use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::diff::Hunk;
use crate::review::{ChangeType, FileReview};

pub const STATE_VERSION: u64 = 1;
const STATE_FILE: &str = "review_state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedReviewState {
    pub version: u64,
    pub timestamp: i64,
    pub current_file_index: usize,
    pub files: Vec<PersistedFileReview>,
}

/// A review as written to disk. The merge buffer and hunk ranges are left
/// out; they are rebuilt on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFileReview {
    pub file_path: PathBuf,
    pub original_content: String,
    pub modified_content: String,
    pub change_type: ChangeType,
    pub hunks: Vec<Hunk>,
}

impl From<&FileReview> for PersistedFileReview {
    fn from(review: &FileReview) -> Self {
        Self {
            file_path: review.file_path.clone(),
            original_content: review.original_content.clone(),
            modified_content: review.modified_content.clone(),
            change_type: review.change_type,
            hunks: review.hunks.clone(),
        }
    }
}

impl PersistedFileReview {
    pub fn into_review(self) -> FileReview {
        FileReview::new(
            self.file_path,
            self.original_content,
            self.modified_content,
            self.change_type,
            self.hunks,
        )
    }
}

pub fn state_file(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILE)
}

/// Writes the review set atomically (temp file + rename). Failures are
/// reported on stderr and leave the previous state file untouched.
pub fn save_review_state(
    state_dir: &Path,
    reviews: &[FileReview],
    current_file_index: usize,
) -> bool {
    let state = PersistedReviewState {
        version: STATE_VERSION,
        timestamp: now_millis(),
        current_file_index,
        files: reviews.iter().map(PersistedFileReview::from).collect(),
    };
    match write_state(state_dir, &state) {
        Ok(()) => true,
        Err(err) => {
            eprintln!("warning: failed to save review state: {err:#}");
            false
        }
    }
}

fn write_state(state_dir: &Path, state: &PersistedReviewState) -> Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("creating state dir {}", state_dir.display()))?;
    let target = state_file(state_dir);
    let json = serde_json::to_vec_pretty(state).context("serializing review state")?;
    let temp_path = state_dir.join(format!(
        "{STATE_FILE}.tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    ));
    let written = (|| -> Result<()> {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("creating temp file {}", temp_path.display()))?;
        file.write_all(&json)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
        fs::rename(&temp_path, &target)
            .with_context(|| format!("replacing {}", target.display()))
    })();
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}

/// Reads the saved review set. Anything missing, unreadable, or written by a
/// different format version is treated as no state at all.
pub fn load_review_state(state_dir: &Path) -> Option<PersistedReviewState> {
    let raw = fs::read_to_string(state_file(state_dir)).ok()?;
    let value: JsonValue = serde_json::from_str(&raw).ok()?;
    if value.get("version").and_then(JsonValue::as_u64) != Some(STATE_VERSION) {
        return None;
    }
    if !value.get("files").is_some_and(JsonValue::is_array) {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(state) => Some(state),
        Err(err) => {
            eprintln!("warning: ignoring malformed review state: {err}");
            None
        }
    }
}

/// Deletes the state file; a missing file is not an error.
pub fn clear_review_state(state_dir: &Path) -> bool {
    let path = state_file(state_dir);
    match fs::remove_file(&path) {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(err) => {
            eprintln!("warning: failed to remove {}: {err}", path.display());
            false
        }
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Deadline-based debounce for saves. A new `schedule` replaces any pending
/// deadline; the host polls `take_due` from its event loop.
#[derive(Debug, Clone)]
pub struct SaveDebouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl SaveDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true (and clears the deadline) once `now` has reached it.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(at) if now >= at => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_hunks;

    fn review(path: &str, original: &str, modified: &str) -> FileReview {
        FileReview::new(
            PathBuf::from(path),
            original.into(),
            modified.into(),
            ChangeType::Edit,
            compute_hunks(original, modified),
        )
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut first = review("/w/a.txt", "a\nb\n", "a\nc\n");
        first.resolve(0, true);
        let second = review("/w/b.txt", "x", "y");
        assert!(save_review_state(dir.path(), &[first.clone(), second.clone()], 1));

        let state = load_review_state(dir.path()).expect("state loads");
        assert_eq!(state.version, 1);
        assert_eq!(state.current_file_index, 1);
        assert_eq!(state.files.len(), 2);
        let restored = state.files[0].clone().into_review();
        assert_eq!(restored, first);
        assert_eq!(state.files[1].clone().into_review().hunks, second.hunks);
    }

    #[test]
    fn derived_fields_are_not_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        save_review_state(dir.path(), &[review("/w/a.txt", "a", "b")], 0);
        let raw = fs::read_to_string(state_file(dir.path())).expect("state file");
        assert!(raw.contains("\"currentFileIndex\""));
        assert!(raw.contains("\"changeType\": \"edit\""));
        assert!(!raw.contains("mergedLines"));
        assert!(!raw.contains("hunkRanges"));
    }

    #[test]
    fn wrong_version_or_shape_loads_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = state_file(dir.path());
        assert!(load_review_state(dir.path()).is_none());

        fs::write(&path, r#"{"version":2,"timestamp":0,"currentFileIndex":0,"files":[]}"#)
            .expect("write");
        assert!(load_review_state(dir.path()).is_none());

        fs::write(&path, r#"{"version":1,"timestamp":0,"currentFileIndex":0}"#).expect("write");
        assert!(load_review_state(dir.path()).is_none());

        fs::write(&path, "not json").expect("write");
        assert!(load_review_state(dir.path()).is_none());

        fs::write(&path, r#"{"version":1,"timestamp":0,"currentFileIndex":0,"files":[]}"#)
            .expect("write");
        assert!(load_review_state(dir.path()).is_some());
    }

    #[test]
    fn clear_ignores_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(clear_review_state(dir.path()));
        save_review_state(dir.path(), &[], 0);
        assert!(state_file(dir.path()).exists());
        assert!(clear_review_state(dir.path()));
        assert!(!state_file(dir.path()).exists());
    }

    #[test]
    fn save_failure_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("state");
        fs::write(&blocker, "a file, not a directory").expect("write");
        assert!(!save_review_state(&blocker, &[], 0));
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn debouncer_keeps_latest_deadline() {
        let mut debouncer = SaveDebouncer::new(Duration::from_millis(500));
        let start = Instant::now();
        debouncer.schedule(start);
        debouncer.schedule(start + Duration::from_millis(300));
        assert!(!debouncer.take_due(start + Duration::from_millis(600)));
        assert!(debouncer.take_due(start + Duration::from_millis(800)));
        assert!(!debouncer.is_pending());
    }
}
