//! Layout of the live merge buffer.
//!
//! The buffer starts from the agent's modified lines and, hunk by hunk,
//! decides which side of each change is materialized:
//!
//! | hunk state                  | removed lines | added lines |
//! |-----------------------------|---------------|-------------|
//! | resolved, accepted          | hidden        | shown       |
//! | resolved, rejected          | shown         | hidden      |
//! | pending, has added lines    | hidden        | shown       |
//! | pending, pure deletion      | shown         | (none)      |
//!
//! Hidden segments still get a zero-width range at the position they would
//! have occupied, so decorations can anchor on them.

use std::ops::Range;

use crate::diff::Hunk;

/// Where a hunk currently sits inside the merge buffer. All bounds are
/// half-open line offsets into [`MergedContent::lines`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HunkRange {
    pub hunk_id: usize,
    pub removed_start: usize,
    pub removed_end: usize,
    pub added_start: usize,
    pub added_end: usize,
}

impl HunkRange {
    pub fn removed(&self) -> Range<usize> {
        self.removed_start..self.removed_end
    }

    pub fn added(&self) -> Range<usize> {
        self.added_start..self.added_end
    }

    /// Number of buffer lines this hunk contributes.
    pub fn visible_len(&self) -> usize {
        self.removed().len() + self.added().len()
    }

    /// First buffer line of the hunk, for cursor placement.
    pub fn anchor(&self) -> usize {
        self.removed_start.min(self.added_start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergedContent {
    pub lines: Vec<String>,
    pub ranges: Vec<HunkRange>,
}

impl MergedContent {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

fn shows_removed(hunk: &Hunk) -> bool {
    if hunk.resolved {
        !hunk.accepted
    } else {
        hunk.added.is_empty()
    }
}

fn shows_added(hunk: &Hunk) -> bool {
    !hunk.resolved || hunk.accepted
}

/// Blends `modified_lines` with each hunk's resolution state.
///
/// Hunks are laid out in `mod_start` order; ranges come back in the same
/// order as `hunks`. Offsets that point past the modified text or backwards
/// into an earlier hunk are clamped rather than trusted.
pub fn build_merged_content<S: AsRef<str>>(modified_lines: &[S], hunks: &[Hunk]) -> MergedContent {
    let mut order: Vec<usize> = (0..hunks.len()).collect();
    order.sort_by_key(|&idx| (hunks[idx].mod_offset(), idx));

    let mut lines: Vec<String> = Vec::with_capacity(modified_lines.len());
    let mut ranges = vec![HunkRange::default(); hunks.len()];
    let mut cursor = 0usize;

    for idx in order {
        let hunk = &hunks[idx];
        let at = hunk.mod_offset().clamp(cursor, modified_lines.len());
        lines.extend(modified_lines[cursor..at].iter().map(|l| l.as_ref().to_string()));

        let removed_start = lines.len();
        if shows_removed(hunk) {
            lines.extend(hunk.removed.iter().cloned());
        }
        let removed_end = lines.len();

        let added_start = lines.len();
        if shows_added(hunk) {
            lines.extend(hunk.added.iter().cloned());
        }
        let added_end = lines.len();

        ranges[idx] = HunkRange {
            hunk_id: hunk.id,
            removed_start,
            removed_end,
            added_start,
            added_end,
        };
        cursor = (at + hunk.added.len()).min(modified_lines.len());
    }

    lines.extend(modified_lines[cursor..].iter().map(|l| l.as_ref().to_string()));
    MergedContent { lines, ranges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_hunks;

    fn hunk(mod_start: usize, removed: &[&str], added: &[&str]) -> Hunk {
        let mod_count = added.len();
        Hunk {
            id: 0,
            orig_start: mod_start,
            orig_count: removed.len(),
            mod_start,
            mod_count,
            removed: removed.iter().map(|s| s.to_string()).collect(),
            added: added.iter().map(|s| s.to_string()).collect(),
            resolved: false,
            accepted: false,
        }
    }

    fn resolve(mut h: Hunk, accepted: bool) -> Hunk {
        h.resolved = true;
        h.accepted = accepted;
        h
    }

    #[test]
    fn accept_and_reject_single_hunk() {
        let modified = ["new"];
        let base = hunk(1, &["old"], &["new"]);

        let accepted = build_merged_content(&modified, &[resolve(base.clone(), true)]);
        assert_eq!(accepted.lines, vec!["new"]);

        let rejected = build_merged_content(&modified, &[resolve(base, false)]);
        assert_eq!(rejected.lines, vec!["old"]);
        assert_eq!(rejected.ranges[0].removed(), 0..1);
        assert_eq!(rejected.ranges[0].added(), 1..1);
    }

    #[test]
    fn pending_hunk_hides_removed_lines() {
        let modified = ["ctx", "new"];
        let merged = build_merged_content(&modified, &[hunk(2, &["old"], &["new"])]);
        assert_eq!(merged.lines, vec!["ctx", "new"]);
        let range = merged.ranges[0];
        assert_eq!(range.removed_start, range.removed_end);
        assert_eq!(range.removed_start, range.added_start);
        assert_eq!(range.added(), 1..2);
        assert_eq!(range.added_end, merged.lines.len());
    }

    #[test]
    fn pure_insertion_pending_and_accepted_match() {
        let modified = ["A", "B", "existing"];
        let pending = hunk(1, &[], &["A", "B"]);
        let unresolved = build_merged_content(&modified, &[pending.clone()]);
        let accepted = build_merged_content(&modified, &[resolve(pending, true)]);
        assert_eq!(unresolved.lines, vec!["A", "B", "existing"]);
        assert_eq!(accepted.lines, unresolved.lines);
        for range in unresolved.ranges.iter().chain(accepted.ranges.iter()) {
            assert_eq!(range.removed_start, range.removed_end);
        }
    }

    #[test]
    fn pure_insertion_rejected_drops_lines() {
        let modified = ["A", "B", "existing"];
        let merged = build_merged_content(&modified, &[resolve(hunk(1, &[], &["A", "B"]), false)]);
        assert_eq!(merged.lines, vec!["existing"]);
        assert_eq!(merged.ranges[0].added(), 0..0);
    }

    #[test]
    fn pending_pure_deletion_stays_visible() {
        let modified = ["context"];
        let merged = build_merged_content(&modified, &[hunk(0, &["old"], &[])]);
        assert_eq!(merged.lines, vec!["old", "context"]);
        assert!(merged.ranges[0].removed_end > merged.ranges[0].removed_start);
    }

    #[test]
    fn pure_deletion_accepted_disappears() {
        let modified = ["context"];
        let merged = build_merged_content(&modified, &[resolve(hunk(0, &["old"], &[]), true)]);
        assert_eq!(merged.lines, vec!["context"]);
    }

    #[test]
    fn sole_trailing_pure_deletion_ends_at_buffer_end() {
        let modified = ["keep"];
        let merged = build_merged_content(&modified, &[hunk(1, &["gone", "also gone"], &[])]);
        assert_eq!(merged.lines, vec!["keep", "gone", "also gone"]);
        assert_eq!(merged.ranges[0].removed_end, merged.lines.len());
        assert_eq!(merged.ranges[0].added(), 3..3);
    }

    #[test]
    fn adjacent_pure_deletions_keep_order() {
        let original = "a\nx\nb\ny\nc";
        let modified = "a\nb\nc";
        let hunks = compute_hunks(original, modified);
        assert_eq!(hunks.len(), 2);
        let modified_lines: Vec<&str> = modified.split('\n').collect();
        let merged = build_merged_content(&modified_lines, &hunks);
        assert_eq!(merged.lines, vec!["a", "x", "b", "y", "c"]);
        assert_eq!(merged.ranges[0].removed(), 1..2);
        assert_eq!(merged.ranges[1].removed(), 3..4);
    }

    #[test]
    fn building_twice_is_identical() {
        let original = "one\ntwo\nthree\nfour\nfive";
        let modified = "one\n2\nthree\nfive\nsix";
        let mut hunks = compute_hunks(original, modified);
        hunks[0].resolved = true;
        let lines: Vec<&str> = modified.split('\n').collect();
        assert_eq!(
            build_merged_content(&lines, &hunks),
            build_merged_content(&lines, &hunks)
        );
    }

    #[test]
    fn fully_resolved_buffer_reproduces_chosen_side() {
        let original = "alpha\nbeta\ngamma\ndelta\n";
        let modified = "alpha\nBETA\ngamma\nepsilon\ndelta\n";
        let lines: Vec<&str> = modified.split('\n').collect();

        let all_rejected: Vec<Hunk> = compute_hunks(original, modified)
            .into_iter()
            .map(|h| resolve(h, false))
            .collect();
        assert_eq!(build_merged_content(&lines, &all_rejected).text(), original);

        let all_accepted: Vec<Hunk> = compute_hunks(original, modified)
            .into_iter()
            .map(|h| resolve(h, true))
            .collect();
        assert_eq!(build_merged_content(&lines, &all_accepted).text(), modified);
    }

    #[test]
    fn five_hunks_partially_resolved() {
        let original = "a\nb\nc\nd\ne\nf\ng\nh\ni\nj";
        let modified = "A\nb\nC\nd\nE\nf\nG\nh\nI\nj";
        let mut hunks = compute_hunks(original, modified);
        assert_eq!(hunks.len(), 5);
        for h in hunks.iter_mut().take(3) {
            h.resolved = true;
            h.accepted = true;
        }
        hunks[3].resolved = true;
        hunks[3].accepted = false;

        let lines: Vec<&str> = modified.split('\n').collect();
        let merged = build_merged_content(&lines, &hunks);
        let unresolved: Vec<_> = hunks.iter().filter(|h| !h.resolved).collect();
        assert_eq!(unresolved.len(), 1);

        let contributed: usize = merged.ranges.iter().map(HunkRange::visible_len).sum();
        let context_lines = lines.len() - hunks.iter().map(|h| h.added.len()).sum::<usize>();
        assert_eq!(merged.lines.len(), context_lines + contributed);
        assert_eq!(merged.lines, vec!["A", "b", "C", "d", "E", "f", "g", "h", "I", "j"]);
    }
}
