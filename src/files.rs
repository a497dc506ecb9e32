use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use glob::glob;
use time::OffsetDateTime;

const BINARY_CHECK_BYTES: usize = 8192;

/// Disk access used by the review engine.
pub trait FileSystem {
    fn exists(&self, path: &Path) -> bool;
    /// Reads a text file. Binary or non-UTF-8 content is an error.
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn write(&self, path: &Path, content: &str) -> Result<()>;
    /// Removes a file; removing a file that is already gone succeeds.
    fn remove(&self, path: &Path) -> Result<()>;
}

/// The real filesystem, with temp-file-then-rename writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFs;

impl FileSystem for DiskFs {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        decode_text(&bytes).with_context(|| format!("decoding {}", path.display()))
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        write_via_temp(path, content.as_bytes())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        }
    }
}

pub fn is_probably_binary(bytes: &[u8]) -> bool {
    let check_len = bytes.len().min(BINARY_CHECK_BYTES);
    bytes[..check_len].contains(&0)
}

pub fn decode_text(bytes: &[u8]) -> Result<String> {
    if is_probably_binary(bytes) {
        bail!("suspected binary content");
    }
    String::from_utf8(bytes.to_vec()).map_err(|err| anyhow!("not valid UTF-8: {err}"))
}

pub fn write_via_temp(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
    }
    let base_dir = parent.unwrap_or_else(|| Path::new("."));
    let unique = format!(
        ".safereview-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    );
    let temp_path = base_dir.join(unique);
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("creating temp file {}", temp_path.display()))?;
        file.write_all(data)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    }
    fs::rename(&temp_path, path).or_else(|err| {
        let _ = fs::remove_file(&temp_path);
        Err(err).with_context(|| format!("replacing {}", path.display()))
    })?;
    Ok(())
}

/// Makes `path` absolute against `root` and folds `.`/`..` components
/// without touching the disk (the file may no longer exist).
pub fn normalize_path(root: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Expands explicit paths and glob patterns into a de-duplicated list.
/// Explicit paths are kept even when missing so deletions can be reviewed.
pub fn resolve_targets(root: &Path, explicit: &[PathBuf], globs: &[String]) -> Result<Vec<PathBuf>> {
    let mut targets: Vec<PathBuf> = explicit.iter().map(|p| normalize_path(root, p)).collect();

    for pattern in globs {
        let anchored = normalize_path(root, Path::new(pattern));
        let anchored = anchored.to_string_lossy();
        let matches =
            glob(&anchored).map_err(|err| anyhow!("invalid glob pattern '{pattern}': {err}"))?;
        for entry in matches {
            let path =
                entry.map_err(|err| anyhow!("error reading matches for '{pattern}': {err}"))?;
            if path.is_file() {
                targets.push(path);
            }
        }
    }

    if targets.is_empty() {
        bail!("no files matched; pass paths or --glob");
    }
    let mut seen = std::collections::HashSet::new();
    targets.retain(|p| seen.insert(p.clone()));
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_content_is_refused() {
        assert!(is_probably_binary(b"abc\x00def"));
        assert!(!is_probably_binary(b""));
        assert!(decode_text(b"ok\n").is_ok());
        assert!(decode_text(b"\x00\x01").is_err());
        assert!(decode_text(&[0xff, 0xfe, 0x41]).is_err());
    }

    #[test]
    fn disk_fs_round_trip_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("file.txt");
        let fs_impl = DiskFs;
        fs_impl.write(&path, "hello\n").expect("write");
        assert!(fs_impl.exists(&path));
        assert_eq!(fs_impl.read_to_string(&path).expect("read"), "hello\n");
        fs_impl.remove(&path).expect("remove");
        assert!(!fs_impl.exists(&path));
        fs_impl.remove(&path).expect("second remove is fine");
    }

    #[test]
    fn temp_files_do_not_linger() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_via_temp(&dir.path().join("a.txt"), b"data").expect("write");
        let names: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt"]);
    }

    #[test]
    fn normalize_folds_dots() {
        let root = Path::new("/work/repo");
        assert_eq!(
            normalize_path(root, Path::new("./src/../lib.rs")),
            PathBuf::from("/work/repo/lib.rs")
        );
        assert_eq!(
            normalize_path(root, Path::new("/abs/x.rs")),
            PathBuf::from("/abs/x.rs")
        );
    }

    #[test]
    fn resolve_targets_expands_globs_and_dedups() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.rs"), "a").expect("write");
        fs::write(dir.path().join("b.rs"), "b").expect("write");
        fs::write(dir.path().join("c.txt"), "c").expect("write");
        let targets = resolve_targets(
            dir.path(),
            &[PathBuf::from("a.rs"), PathBuf::from("gone.rs")],
            &["*.rs".to_string()],
        )
        .expect("targets");
        assert_eq!(targets.len(), 3);
        assert!(targets.contains(&dir.path().join("gone.rs")));
        assert!(targets.iter().all(|p| !p.ends_with("c.txt")));
    }
}
