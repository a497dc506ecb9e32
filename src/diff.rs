use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffTag, capture_diff_slices};
use time::OffsetDateTime;

use crate::patch::parse_unified_hunks;

/// One contiguous change region between the original and the modified text.
///
/// Start lines follow unified-diff numbering: 1-based when the side has lines,
/// otherwise the line after which the change sits (0 = top of file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    pub id: usize,
    pub orig_start: usize,
    pub orig_count: usize,
    pub mod_start: usize,
    pub mod_count: usize,
    pub removed: Vec<String>,
    pub added: Vec<String>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub accepted: bool,
}

impl Hunk {
    /// Builds a hunk from 0-based line offsets on both sides.
    pub fn from_run(
        id: usize,
        old_begin: usize,
        removed: Vec<String>,
        new_begin: usize,
        added: Vec<String>,
    ) -> Self {
        let orig_count = removed.len();
        let mod_count = added.len();
        Self {
            id,
            orig_start: if orig_count > 0 { old_begin + 1 } else { old_begin },
            orig_count,
            mod_start: if mod_count > 0 { new_begin + 1 } else { new_begin },
            mod_count,
            removed,
            added,
            resolved: false,
            accepted: false,
        }
    }

    pub fn is_pure_insertion(&self) -> bool {
        self.removed.is_empty()
    }

    pub fn is_pure_deletion(&self) -> bool {
        self.added.is_empty()
    }

    /// 0-based offset of the first original line covered by this hunk.
    pub fn old_offset(&self) -> usize {
        if self.orig_count > 0 {
            self.orig_start.saturating_sub(1)
        } else {
            self.orig_start
        }
    }

    /// 0-based offset in the modified lines where this hunk's added text begins.
    pub fn mod_offset(&self) -> usize {
        if self.mod_count > 0 {
            self.mod_start.saturating_sub(1)
        } else {
            self.mod_start
        }
    }
}

/// Splits text into the line model used everywhere in the engine.
///
/// `lines.join("\n")` gives back the input, so a trailing newline shows up as
/// a trailing empty line. Empty text has no lines at all.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n').collect()
}

pub fn owned_lines(text: &str) -> Vec<String> {
    split_lines(text).into_iter().map(str::to_string).collect()
}

/// Produces hunks for a pair of texts.
pub trait DiffTool {
    fn hunks(&self, original: &str, modified: &str) -> Result<Vec<Hunk>>;
}

/// In-process Myers diff.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDiff;

impl DiffTool for BuiltinDiff {
    fn hunks(&self, original: &str, modified: &str) -> Result<Vec<Hunk>> {
        Ok(compute_hunks(original, modified))
    }
}

/// Runs `git diff --no-index -U0` over two scratch files and parses the output.
#[derive(Debug, Clone)]
pub struct GitDiffTool {
    scratch_dir: PathBuf,
}

impl GitDiffTool {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }
}

impl Default for GitDiffTool {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl DiffTool for GitDiffTool {
    fn hunks(&self, original: &str, modified: &str) -> Result<Vec<Hunk>> {
        let Some(unified) = self.run_git(original, modified)? else {
            return Ok(Vec::new());
        };
        match parse_unified_hunks(&unified, original, modified) {
            Ok(hunks) => Ok(hunks),
            Err(err) => {
                eprintln!(
                    "warning: git diff output does not line up ({err:#}); using the built-in differ"
                );
                Ok(compute_hunks(original, modified))
            }
        }
    }
}

impl GitDiffTool {
    fn run_git(&self, original: &str, modified: &str) -> Result<Option<String>> {
        fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("creating scratch dir {}", self.scratch_dir.display()))?;
        let stamp = format!(
            "{}-{}",
            std::process::id(),
            OffsetDateTime::now_utc().unix_timestamp_nanos()
        );
        let before = self.scratch_dir.join(format!(".safereview-a-{stamp}"));
        let after = self.scratch_dir.join(format!(".safereview-b-{stamp}"));
        let outcome = write_scratch(&before, original)
            .and_then(|_| write_scratch(&after, modified))
            .and_then(|_| invoke_git_diff(&before, &after));
        let _ = fs::remove_file(&before);
        let _ = fs::remove_file(&after);
        outcome
    }
}

fn write_scratch(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).with_context(|| format!("writing scratch file {}", path.display()))
}

fn invoke_git_diff(before: &Path, after: &Path) -> Result<Option<String>> {
    let output = Command::new("git")
        .args(["diff", "--no-index", "--no-color", "--no-ext-diff", "-U0", "--"])
        .arg(before)
        .arg(after)
        .output()
        .context("running git diff --no-index")?;
    match output.status.code() {
        Some(0) => Ok(None),
        Some(1) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
        code => bail!(
            "git diff exited with {:?}: {}",
            code,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    }
}

/// Line diff with zero context: every maximal run of non-equal operations
/// becomes one hunk. Ids are assigned from 0 in file order.
pub fn compute_hunks(original: &str, modified: &str) -> Vec<Hunk> {
    if original == modified {
        return Vec::new();
    }
    let old_lines = split_lines(original);
    let new_lines = split_lines(modified);
    let ops = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);

    let mut hunks = Vec::new();
    let mut run: Option<(Range<usize>, Range<usize>)> = None;
    for op in &ops {
        if op.tag() == DiffTag::Equal {
            if let Some((old, new)) = run.take() {
                hunks.push(hunk_from_ranges(hunks.len(), &old_lines, old, &new_lines, new));
            }
            continue;
        }
        let (old, new) = (op.old_range(), op.new_range());
        run = Some(match run {
            Some((prev_old, prev_new)) => (prev_old.start..old.end, prev_new.start..new.end),
            None => (old, new),
        });
    }
    if let Some((old, new)) = run {
        hunks.push(hunk_from_ranges(hunks.len(), &old_lines, old, &new_lines, new));
    }
    hunks
}

fn hunk_from_ranges(
    id: usize,
    old_lines: &[&str],
    old: Range<usize>,
    new_lines: &[&str],
    new: Range<usize>,
) -> Hunk {
    let removed = old_lines[old.clone()].iter().map(|l| l.to_string()).collect();
    let added = new_lines[new.clone()].iter().map(|l| l.to_string()).collect();
    Hunk::from_run(id, old.start, removed, new.start, added)
}

/// Single hunk covering the whole file, used when a diff cannot be computed.
pub fn whole_file_hunk(original: &str, modified: &str) -> Vec<Hunk> {
    let removed = owned_lines(original);
    let added = owned_lines(modified);
    if removed.is_empty() && added.is_empty() {
        return Vec::new();
    }
    vec![Hunk::from_run(0, 0, removed, 0, added)]
}

/// Computes hunks with `tool`, degrading to a whole-file hunk on failure.
pub fn build_hunks(tool: &dyn DiffTool, original: &str, modified: &str) -> Vec<Hunk> {
    if original == modified {
        return Vec::new();
    }
    match tool.hunks(original, modified) {
        Ok(hunks) => hunks,
        Err(err) => {
            eprintln!("warning: diff failed ({err:#}); reviewing the whole file as one change");
            whole_file_hunk(original, modified)
        }
    }
}

/// Checks that every hunk matches the texts it claims to describe, and that
/// the lines between and after the hunks are identical on both sides.
pub fn validate_hunks(hunks: &[Hunk], original: &str, modified: &str) -> Result<()> {
    let old_lines = split_lines(original);
    let new_lines = split_lines(modified);
    let mut old_floor = 0usize;
    let mut new_floor = 0usize;
    for hunk in hunks {
        if hunk.removed.is_empty() && hunk.added.is_empty() {
            bail!("hunk {} is empty", hunk.id);
        }
        let old_at = hunk.old_offset();
        let new_at = hunk.mod_offset();
        if old_at < old_floor || new_at < new_floor {
            bail!("hunk {} overlaps the previous hunk", hunk.id);
        }
        let old_end = old_at + hunk.removed.len();
        let new_end = new_at + hunk.added.len();
        if old_end > old_lines.len() || new_end > new_lines.len() {
            bail!("hunk {} runs past the end of the file", hunk.id);
        }
        if old_lines[old_floor..old_at] != new_lines[new_floor..new_at] {
            bail!("unchanged lines before hunk {} differ between the texts", hunk.id);
        }
        if old_lines[old_at..old_end] != hunk.removed[..] {
            bail!("hunk {} removed lines do not match the original", hunk.id);
        }
        if new_lines[new_at..new_end] != hunk.added[..] {
            bail!("hunk {} added lines do not match the modified text", hunk.id);
        }
        old_floor = old_end;
        new_floor = new_end;
    }
    if old_lines[old_floor..] != new_lines[new_floor..] {
        bail!("unchanged lines after the last hunk differ between the texts");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingTool;

    impl DiffTool for FailingTool {
        fn hunks(&self, _original: &str, _modified: &str) -> Result<Vec<Hunk>> {
            bail!("diff tool crashed")
        }
    }

    #[test]
    fn identical_texts_have_no_hunks() {
        assert!(compute_hunks("a\nb\n", "a\nb\n").is_empty());
    }

    #[test]
    fn single_line_change() {
        let hunks = compute_hunks("line1\nline2\nline3\n", "line1\nchanged\nline3\n");
        assert_eq!(hunks.len(), 1);
        let hunk = &hunks[0];
        assert_eq!(hunk.id, 0);
        assert_eq!((hunk.orig_start, hunk.orig_count), (2, 1));
        assert_eq!((hunk.mod_start, hunk.mod_count), (2, 1));
        assert_eq!(hunk.removed, vec!["line2"]);
        assert_eq!(hunk.added, vec!["changed"]);
        assert!(!hunk.resolved && !hunk.accepted);
    }

    #[test]
    fn separated_changes_become_separate_hunks() {
        let hunks = compute_hunks("a\nb\nc\nd\ne", "A\nb\nc\nD\ne");
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].removed, vec!["a"]);
        assert_eq!(hunks[1].removed, vec!["d"]);
        assert_eq!(hunks[1].id, 1);
    }

    #[test]
    fn pure_insertion_uses_after_line_numbering() {
        let hunks = compute_hunks("a\nb", "a\nx\ny\nb");
        assert_eq!(hunks.len(), 1);
        let hunk = &hunks[0];
        assert!(hunk.is_pure_insertion());
        assert_eq!((hunk.orig_start, hunk.orig_count), (1, 0));
        assert_eq!((hunk.mod_start, hunk.mod_count), (2, 2));
        assert_eq!(hunk.mod_offset(), 1);
    }

    #[test]
    fn pure_deletion_at_top_of_file() {
        let hunks = compute_hunks("old\ncontext", "context");
        assert_eq!(hunks.len(), 1);
        let hunk = &hunks[0];
        assert!(hunk.is_pure_deletion());
        assert_eq!((hunk.mod_start, hunk.mod_count), (0, 0));
        assert_eq!(hunk.mod_offset(), 0);
        assert_eq!(hunk.old_offset(), 0);
    }

    #[test]
    fn computed_hunks_validate() {
        let original = "fn main() {\n    println!(\"hi\");\n}\n";
        let modified = "fn main() {\n    let x = 1;\n    println!(\"{x}\");\n}\n// end\n";
        let hunks = compute_hunks(original, modified);
        validate_hunks(&hunks, original, modified).expect("hunks match texts");
    }

    #[test]
    fn whole_file_fallback_covers_everything() {
        let hunks = build_hunks(&FailingTool, "one\ntwo", "three");
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].removed, vec!["one", "two"]);
        assert_eq!(hunks[0].added, vec!["three"]);
        validate_hunks(&hunks, "one\ntwo", "three").expect("fallback hunk is consistent");
    }

    #[test]
    fn build_hunks_skips_tool_for_identical_text() {
        assert!(build_hunks(&FailingTool, "same", "same").is_empty());
    }

    #[test]
    fn empty_text_has_no_lines() {
        assert!(split_lines("").is_empty());
        assert_eq!(split_lines("\n"), vec!["", ""]);
        assert_eq!(owned_lines("").join("\n"), "");
    }

    #[test]
    fn deleting_all_content_is_a_pure_deletion() {
        let hunks = compute_hunks("original content", "");
        assert_eq!(hunks.len(), 1);
        let hunk = &hunks[0];
        assert!(hunk.is_pure_deletion());
        assert_eq!(hunk.removed, vec!["original content"]);
        assert_eq!((hunk.orig_start, hunk.orig_count), (1, 1));
        assert_eq!((hunk.mod_start, hunk.mod_count), (0, 0));
        validate_hunks(&hunks, "original content", "").expect("deletion is consistent");
    }

    #[test]
    fn creating_content_is_a_pure_insertion() {
        let hunks = compute_hunks("", "new content");
        assert_eq!(hunks.len(), 1);
        let hunk = &hunks[0];
        assert!(hunk.is_pure_insertion());
        assert_eq!(hunk.added, vec!["new content"]);
        assert_eq!((hunk.orig_start, hunk.orig_count), (0, 0));
        assert_eq!((hunk.mod_start, hunk.mod_count), (1, 1));
        validate_hunks(&hunks, "", "new content").expect("creation is consistent");
    }

    #[test]
    fn validation_checks_unchanged_tail() {
        // Shape `git diff` reports for a dropped trailing newline.
        let hunks = vec![Hunk::from_run(0, 0, vec!["a".into()], 0, vec!["a".into(), "b".into()])];
        let err = validate_hunks(&hunks, "a\n", "a\nb").expect_err("tail differs");
        assert!(err.to_string().contains("after the last hunk"), "{err:#}");
    }

    #[test]
    fn validation_checks_unchanged_gap() {
        let hunks = vec![Hunk::from_run(0, 1, vec!["b".into()], 1, vec!["B".into()])];
        assert!(validate_hunks(&hunks, "x\nb", "y\nB").is_err());
    }

    #[test]
    fn git_diff_round_trips_trailing_newline_changes() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let tool = GitDiffTool::new(scratch.path());
        let cases = [
            ("a\n", "a\nb"),
            ("a\nb", "a\nb\n"),
            ("one\ntwo\n", "one\nTWO"),
            ("", "fresh\n"),
        ];
        for (original, modified) in cases {
            let hunks = tool.hunks(original, modified).expect("git diff runs");
            validate_hunks(&hunks, original, modified).expect("hunks line up");
            let lines = owned_lines(modified);
            let settle = |accept: bool| {
                let resolved: Vec<Hunk> = hunks
                    .iter()
                    .cloned()
                    .map(|mut h| {
                        h.resolved = true;
                        h.accepted = accept;
                        h
                    })
                    .collect();
                crate::merge::build_merged_content(&lines, &resolved).text()
            };
            assert_eq!(settle(false), original, "reject all of {original:?} -> {modified:?}");
            assert_eq!(settle(true), modified, "accept all of {original:?} -> {modified:?}");
        }
    }

    #[test]
    fn validation_rejects_mismatched_lines() {
        let mut hunks = compute_hunks("a\nb", "a\nc");
        hunks[0].removed = vec!["zzz".into()];
        assert!(validate_hunks(&hunks, "a\nb", "a\nc").is_err());
    }
}
