use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use anyhow::{Context, Result, bail};

use crate::files::{decode_text, write_via_temp};

/// Pre-edit content captured by the agent's hooks just before a tool runs.
pub trait SnapshotSource {
    fn snapshot(&self, path: &Path) -> Option<String>;
    /// Called once a review for `path` is finalized.
    fn release(&self, _path: &Path) {}
}

/// In-memory snapshot table. Clones share the same table, so the hook side
/// can keep a handle while the review manager owns another.
#[derive(Debug, Clone, Default)]
pub struct HookSnapshots {
    inner: Rc<RefCell<HashMap<PathBuf, String>>>,
}

impl HookSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first snapshot taken for a path; later edits by the agent
    /// must still be compared against the content from before the first one.
    pub fn record(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.inner
            .borrow_mut()
            .entry(path.into())
            .or_insert_with(|| content.into());
    }

    pub fn forget(&self, path: &Path) {
        self.inner.borrow_mut().remove(path);
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl SnapshotSource for HookSnapshots {
    fn snapshot(&self, path: &Path) -> Option<String> {
        self.inner.borrow().get(path).cloned()
    }

    fn release(&self, path: &Path) {
        self.forget(path);
    }
}

/// Snapshots kept as files under a directory, so a pre-edit hook running in
/// one process can hand content to a review started by another.
#[derive(Debug, Clone)]
pub struct DirSnapshots {
    dir: PathBuf,
}

impl DirSnapshots {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, path: &Path) -> PathBuf {
        self.dir.join(format!("{}.orig", sanitize_path(path)))
    }

    /// Stores `content` unless a snapshot for `path` already exists.
    /// Returns whether anything was written.
    pub fn record(&self, path: &Path, content: &str) -> Result<bool> {
        let entry = self.entry_path(path);
        if entry.exists() {
            return Ok(false);
        }
        write_via_temp(&entry, content.as_bytes())
            .with_context(|| format!("saving snapshot of {}", path.display()))?;
        Ok(true)
    }

    /// Stores `content`, replacing any earlier snapshot.
    pub fn replace(&self, path: &Path, content: &str) -> Result<()> {
        write_via_temp(&self.entry_path(path), content.as_bytes())
            .with_context(|| format!("saving snapshot of {}", path.display()))
    }
}

impl SnapshotSource for DirSnapshots {
    fn snapshot(&self, path: &Path) -> Option<String> {
        let bytes = fs::read(self.entry_path(path)).ok()?;
        decode_text(&bytes).ok()
    }

    fn release(&self, path: &Path) {
        let entry = self.entry_path(path);
        if let Err(err) = fs::remove_file(&entry) {
            if err.kind() != ErrorKind::NotFound {
                eprintln!("warning: failed to remove {}: {err}", entry.display());
            }
        }
    }
}

fn sanitize_path(path: &Path) -> String {
    path.display()
        .to_string()
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect()
}

/// Committed content of a file, used when no hook snapshot exists.
pub trait VersionControl {
    fn read_original(&self, path: &Path) -> Result<String>;
}

/// Reads `HEAD:<path>` from the git repository at `root`.
#[derive(Debug, Clone)]
pub struct GitHistory {
    root: PathBuf,
}

impl GitHistory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl VersionControl for GitHistory {
    fn read_original(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let tree_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(["show", &format!("HEAD:{tree_path}")])
            .output()
            .context("running git show")?;
        if !output.status.success() {
            bail!(
                "git show HEAD:{tree_path} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        decode_text(&output.stdout).with_context(|| format!("decoding HEAD:{tree_path}"))
    }
}

/// Version control lookup that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl VersionControl for NoHistory {
    fn read_original(&self, path: &Path) -> Result<String> {
        bail!("no version history for {}", path.display())
    }
}
