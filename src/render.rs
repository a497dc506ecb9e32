use std::fmt::Write as _;

use crate::diff::Hunk;
use crate::inline::{InlineSegment, inline_diff};
use crate::review::FileReview;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const BOLD_REVERSE: &str = "\x1b[1;7m";
const RESET: &str = "\x1b[0m";

pub fn hunk_state(hunk: &Hunk) -> &'static str {
    match (hunk.resolved, hunk.accepted) {
        (false, _) => "pending",
        (true, true) => "accepted",
        (true, false) => "rejected",
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Marker {
    Plain,
    Removed,
    Added,
}

/// Renders the merge buffer for a terminal.
///
/// Buffer lines carry their 1-based number. Pending hunks get a header, and a
/// pending replacement also shows the removed lines (unnumbered, since they
/// are not part of the buffer) above the added ones, with changed words
/// highlighted when `color` is set. `focus` marks one hunk id with `>`.
pub fn render_review(review: &FileReview, color: bool, focus: Option<usize>) -> String {
    let lines = &review.merged_lines;
    let mut markers = vec![Marker::Plain; lines.len()];
    let mut paired: Vec<Option<String>> = vec![None; lines.len()];
    let mut headers: Vec<Vec<usize>> = vec![Vec::new(); lines.len() + 1];

    for (hunk, range) in review.hunks.iter().zip(&review.hunk_ranges) {
        if hunk.resolved {
            continue;
        }
        headers[range.anchor().min(lines.len())].push(hunk.id);
        for idx in range.removed() {
            markers[idx] = Marker::Removed;
        }
        for (offset, idx) in range.added().enumerate() {
            markers[idx] = Marker::Added;
            paired[idx] = hunk.removed.get(offset).cloned();
        }
    }

    let width = lines.len().max(1).to_string().len();
    let mut out = String::new();
    for (idx, line) in lines.iter().enumerate() {
        for &id in &headers[idx] {
            push_header(&mut out, review, id, color, focus);
        }
        match markers[idx] {
            Marker::Plain => {
                let _ = writeln!(out, "{:>width$}   {line}", idx + 1);
            }
            Marker::Removed => {
                let body = paint(line, RED, color);
                let _ = writeln!(out, "{:>width$} - {body}", idx + 1);
            }
            Marker::Added => {
                let body = added_body(line, paired[idx].as_deref(), color);
                let _ = writeln!(out, "{:>width$} + {body}", idx + 1);
            }
        }
    }
    for &id in &headers[lines.len()] {
        push_header(&mut out, review, id, color, focus);
    }
    out
}

/// Renders one hunk: its header and the buffer lines it currently occupies.
pub fn render_hunk(review: &FileReview, hunk_id: usize, color: bool) -> String {
    let mut out = String::new();
    let (Some(hunk), Some(range)) = (review.hunk(hunk_id), review.range_for(hunk_id)) else {
        return out;
    };
    push_header(&mut out, review, hunk_id, color, Some(hunk_id));
    let width = gutter_width(review);
    for idx in range.removed() {
        let body = paint(&review.merged_lines[idx], RED, color);
        let _ = writeln!(out, "{:>width$} - {body}", idx + 1);
    }
    for (offset, idx) in range.added().enumerate() {
        let old = (!hunk.resolved)
            .then(|| hunk.removed.get(offset))
            .flatten()
            .map(String::as_str);
        let body = added_body(&review.merged_lines[idx], old, color);
        let _ = writeln!(out, "{:>width$} + {body}", idx + 1);
    }
    out
}

fn added_body(line: &str, old: Option<&str>, color: bool) -> String {
    match (old, color) {
        (Some(old), true) => emphasize(&inline_diff(old, line).new, GREEN),
        _ => paint(line, GREEN, color),
    }
}

fn push_header(
    out: &mut String,
    review: &FileReview,
    hunk_id: usize,
    color: bool,
    focus: Option<usize>,
) {
    let Some(hunk) = review.hunk(hunk_id) else {
        return;
    };
    let pointer = if focus == Some(hunk_id) { ">" } else { " " };
    let header = format!(
        "@@ hunk {} -{},{} +{},{} ({}) @@",
        hunk.id,
        hunk.orig_start,
        hunk.orig_count,
        hunk.mod_start,
        hunk.mod_count,
        hunk_state(hunk)
    );
    let _ = writeln!(out, "{pointer}{}", paint(&header, CYAN, color));

    // A replacement only shows its added side in the buffer.
    if hunk.added.is_empty() {
        return;
    }
    for (offset, old) in hunk.removed.iter().enumerate() {
        let body = match (hunk.added.get(offset), color) {
            (Some(new), true) => emphasize(&inline_diff(old, new).old, RED),
            _ => paint(old, RED, color),
        };
        let _ = writeln!(out, "{:>width$} - {body}", "", width = gutter_width(review));
    }
}

fn gutter_width(review: &FileReview) -> usize {
    review.merged_lines.len().max(1).to_string().len()
}

fn paint(text: &str, code: &str, color: bool) -> String {
    if color {
        format!("{code}{text}{RESET}")
    } else {
        text.to_string()
    }
}

fn emphasize(segments: &[InlineSegment], base: &str) -> String {
    let mut out = String::from(base);
    for segment in segments {
        if segment.changed {
            out.push_str(BOLD_REVERSE);
            out.push_str(&segment.text);
            out.push_str(RESET);
            out.push_str(base);
        } else {
            out.push_str(&segment.text);
        }
    }
    out.push_str(RESET);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_hunks;
    use crate::review::ChangeType;

    fn review(original: &str, modified: &str) -> FileReview {
        FileReview::new(
            "/w/a.txt".into(),
            original.into(),
            modified.into(),
            ChangeType::Edit,
            compute_hunks(original, modified),
        )
    }

    #[test]
    fn replacement_shows_both_sides() {
        let review = review("a\nold\nc", "a\nnew\nc");
        let text = render_review(&review, false, Some(0));
        let expected = "\
1   a
>@@ hunk 0 -2,1 +2,1 (pending) @@
  - old
2 + new
3   c
";
        assert_eq!(text, expected);
    }

    #[test]
    fn pending_deletion_is_numbered_in_buffer() {
        let review = review("a\ngone\nc", "a\nc");
        let text = render_review(&review, false, None);
        assert!(text.contains("2 - gone\n"), "{text}");
        assert!(text.contains("3   c\n"), "{text}");
    }

    #[test]
    fn resolved_hunks_render_as_plain_lines() {
        let mut review = review("a\nold\nc", "a\nnew\nc");
        review.resolve(0, false);
        let text = render_review(&review, false, None);
        assert_eq!(text, "1   a\n2   old\n3   c\n");
    }

    #[test]
    fn color_highlights_changed_words() {
        let review = review("let x = 1;", "let y = 1;");
        let text = render_review(&review, true, None);
        assert!(text.contains(&format!("{BOLD_REVERSE}y{RESET}")), "{text:?}");
        assert!(text.contains(&format!("{BOLD_REVERSE}x{RESET}")), "{text:?}");
    }

    #[test]
    fn single_hunk_view() {
        let review = review("a\nb\nc\nd\ne", "A\nb\nc\nd\nE");
        let text = render_hunk(&review, 1, false);
        assert_eq!(text, ">@@ hunk 1 -5,1 +5,1 (pending) @@\n  - e\n5 + E\n");
        assert!(render_hunk(&review, 9, false).is_empty());
    }

    #[test]
    fn states_are_named() {
        let mut review = review("a\nb\nc\nd\ne", "A\nb\nc\nd\nE");
        review.resolve(0, true);
        review.resolve(1, false);
        assert_eq!(hunk_state(&review.hunks[0]), "accepted");
        assert_eq!(hunk_state(&review.hunks[1]), "rejected");
    }
}
