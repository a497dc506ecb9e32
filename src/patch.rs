use std::mem;

use anyhow::{Result, anyhow, bail};
use diffy::{Line, Patch};

use crate::diff::{Hunk, validate_hunks};

/// Parses unified diff output into minimal hunks for `original` -> `modified`.
///
/// Only the first file section of a multi-file patch is used. Hunks carrying
/// context lines are split at every context line, so the result has the same
/// shape as the built-in differ's output.
pub fn parse_unified_hunks(text: &str, original: &str, modified: &str) -> Result<Vec<Hunk>> {
    let segments = split_segments(text)?;
    let body = match segments.into_iter().next() {
        Some(segment) => segment.body,
        None if text.trim().is_empty() => return Ok(Vec::new()),
        None => format!("--- a\n+++ b\n{text}"),
    };
    let patch = Patch::from_str(&body).map_err(|err| anyhow!("failed to parse diff: {err}"))?;

    let mut hunks = Vec::new();
    for block in patch.hunks() {
        let old_range = block.old_range();
        let new_range = block.new_range();
        let mut old_next = zero_based(old_range.start(), old_range.len());
        let mut new_next = zero_based(new_range.start(), new_range.len());
        let mut run = ChangeRun::default();

        for line in block.lines() {
            match line {
                Line::Context(_) => {
                    run.flush(&mut hunks);
                    old_next += 1;
                    new_next += 1;
                }
                Line::Delete(text) => {
                    run.start(old_next, new_next);
                    run.removed.push(strip_newline(text));
                    old_next += 1;
                }
                Line::Insert(text) => {
                    run.start(old_next, new_next);
                    run.added.push(strip_newline(text));
                    new_next += 1;
                }
            }
        }
        run.flush(&mut hunks);
    }

    validate_hunks(&hunks, original, modified)?;
    Ok(hunks)
}

fn zero_based(start: usize, len: usize) -> usize {
    if len == 0 { start } else { start.saturating_sub(1) }
}

fn strip_newline(text: &str) -> String {
    text.strip_suffix('\n').unwrap_or(text).to_string()
}

#[derive(Default)]
struct ChangeRun {
    anchor: Option<(usize, usize)>,
    removed: Vec<String>,
    added: Vec<String>,
}

impl ChangeRun {
    fn start(&mut self, old_at: usize, new_at: usize) {
        if self.anchor.is_none() {
            self.anchor = Some((old_at, new_at));
        }
    }

    fn flush(&mut self, hunks: &mut Vec<Hunk>) {
        let Some((old_at, new_at)) = self.anchor.take() else {
            return;
        };
        let removed = mem::take(&mut self.removed);
        let added = mem::take(&mut self.added);
        hunks.push(Hunk::from_run(hunks.len(), old_at, removed, new_at, added));
    }
}

struct Segment {
    body: String,
}

fn split_segments(text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut has_new = false;
    let mut in_segment = false;

    let chunks: Vec<&str> = text.split_inclusive('\n').collect();
    for (idx, chunk) in chunks.iter().enumerate() {
        let trimmed = chunk.trim_end_matches('\n').trim_end_matches('\r');

        if trimmed.starts_with("diff --") {
            if in_segment {
                finalize_segment(&mut segments, &mut buffer, has_new)?;
                has_new = false;
                in_segment = false;
            }
            continue;
        }
        let next_is_new_label = chunks
            .get(idx + 1)
            .is_some_and(|next| next.starts_with("+++ "));
        if trimmed.starts_with("--- ") && (!in_segment || next_is_new_label) {
            if in_segment {
                finalize_segment(&mut segments, &mut buffer, has_new)?;
            }
            buffer.clear();
            buffer.push_str(chunk);
            has_new = false;
            in_segment = true;
            continue;
        }

        if !in_segment {
            continue;
        }

        if !has_new && trimmed.starts_with("+++ ") {
            has_new = true;
        }
        buffer.push_str(chunk);
    }

    if in_segment {
        finalize_segment(&mut segments, &mut buffer, has_new)?;
    }

    Ok(segments)
}

fn finalize_segment(segments: &mut Vec<Segment>, buffer: &mut String, has_new: bool) -> Result<()> {
    if !has_new {
        bail!("patch segment missing +++ header");
    }
    segments.push(Segment {
        body: mem::take(buffer),
    });
    Ok(())
}
