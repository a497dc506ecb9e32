use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

const LOG_FILE: &str = "change_log.jsonl";
pub const DEFAULT_MAX_ENTRIES: usize = 500;

#[derive(Debug, Serialize)]
struct ChangeLogEntry<'a> {
    timestamp: &'a str,
    command: &'a str,
    path: &'a Path,
    action: &'a str,
    #[serde(rename = "lines")]
    line_info: &'a str,
}

/// An entry read back from the change log.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggedChange {
    pub timestamp: String,
    pub command: String,
    pub path: PathBuf,
    pub action: String,
    #[serde(rename = "lines", default)]
    pub line_info: String,
}

/// Append-only JSON Lines record of every disk write the engine makes.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    dir: PathBuf,
    max_entries: usize,
    enabled: bool,
}

impl ChangeLog {
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            max_entries,
            enabled,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn record(&self, command: &str, path: &Path, action: &str, line_info: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let log_path = self.ensure_log_file()?;
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".into());
        let entry = ChangeLogEntry {
            timestamp: &timestamp,
            command,
            path,
            action,
            line_info,
        };
        let json = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .with_context(|| format!("opening {log_path:?}"))?;
        writeln!(file, "{json}")?;
        self.truncate_log(&log_path)?;
        Ok(())
    }

    /// Last `count` entries, oldest first. Unparseable lines are skipped.
    pub fn read_recent(&self, count: usize) -> Result<Vec<LoggedChange>> {
        let mut entries = self.read_all()?;
        let skip = entries.len().saturating_sub(count);
        Ok(entries.split_off(skip))
    }

    pub fn read_all(&self) -> Result<Vec<LoggedChange>> {
        let log_path = self.path();
        let file = match fs::File::open(&log_path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("reading {log_path:?}")),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Ok(entry) = serde_json::from_str::<LoggedChange>(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn ensure_log_file(&self) -> Result<PathBuf> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).with_context(|| format!("creating {:?}", self.dir))?;
        }
        Ok(self.path())
    }

    fn truncate_log(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .with_context(|| format!("reading {path:?}"))?;
        let reader = BufReader::new(file);
        let lines: Vec<_> = reader.lines().collect::<Result<_, _>>()?;
        if lines.len() <= self.max_entries {
            return Ok(());
        }
        let keep = &lines[lines.len() - self.max_entries..];
        fs::write(path, keep.join("\n") + "\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = ChangeLog::new(dir.path(), DEFAULT_MAX_ENTRIES, true);
        log.record("finalize", Path::new("/w/a.txt"), "write", "1 accepted, 0 rejected")
            .expect("record");
        log.record("finalize", Path::new("/w/b.txt"), "delete", "0 accepted, 2 rejected")
            .expect("record");

        let entries = log.read_recent(1).expect("read");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "delete");
        assert_eq!(entries[0].path, PathBuf::from("/w/b.txt"));
        assert_eq!(log.read_all().expect("read").len(), 2);
    }

    #[test]
    fn keeps_only_newest_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = ChangeLog::new(dir.path(), 3, true);
        for idx in 0..5 {
            log.record("finalize", Path::new(&format!("f{idx}")), "write", "")
                .expect("record");
        }
        let entries = log.read_all().expect("read");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, PathBuf::from("f2"));
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = ChangeLog::new(dir.path(), 10, false);
        log.record("finalize", Path::new("x"), "write", "").expect("record");
        assert!(!log.path().exists());
        assert!(log.read_all().expect("read").is_empty());
    }
}
