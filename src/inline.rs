use similar::{ChangeTag, TextDiff};

/// A run of text on one side of an inline diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineSegment {
    pub text: String,
    pub changed: bool,
}

/// Word-level diff of a removed/added line pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineDiff {
    pub old: Vec<InlineSegment>,
    pub new: Vec<InlineSegment>,
}

impl InlineDiff {
    pub fn has_changes(&self) -> bool {
        self.old.iter().chain(self.new.iter()).any(|seg| seg.changed)
    }
}

/// Computes which words differ between `old_line` and `new_line`.
///
/// Joining the segments of either side gives back that side's line.
pub fn inline_diff(old_line: &str, new_line: &str) -> InlineDiff {
    let diff = TextDiff::from_words(old_line, new_line);
    let mut result = InlineDiff::default();

    for change in diff.iter_all_changes() {
        let text = change.value().to_string();
        match change.tag() {
            ChangeTag::Delete => push_segment(&mut result.old, text, true),
            ChangeTag::Insert => push_segment(&mut result.new, text, true),
            ChangeTag::Equal => {
                push_segment(&mut result.old, text.clone(), false);
                push_segment(&mut result.new, text, false);
            }
        }
    }
    result
}

fn push_segment(side: &mut Vec<InlineSegment>, text: String, changed: bool) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = side.last_mut() {
        if last.changed == changed {
            last.text.push_str(&text);
            return;
        }
    }
    side.push(InlineSegment { text, changed });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(side: &[InlineSegment]) -> String {
        side.iter().map(|seg| seg.text.as_str()).collect()
    }

    #[test]
    fn segments_rebuild_both_lines() {
        let diff = inline_diff("let total = a + b;", "let sum = a + c;");
        assert_eq!(join(&diff.old), "let total = a + b;");
        assert_eq!(join(&diff.new), "let sum = a + c;");
        assert!(diff.has_changes());
    }

    #[test]
    fn changed_word_is_emphasized() {
        let diff = inline_diff("hello world", "hello there");
        let changed_old: Vec<_> = diff.old.iter().filter(|s| s.changed).collect();
        let changed_new: Vec<_> = diff.new.iter().filter(|s| s.changed).collect();
        assert!(changed_old.iter().any(|s| s.text.contains("world")));
        assert!(changed_new.iter().any(|s| s.text.contains("there")));
        assert!(!diff.old[0].changed);
    }

    #[test]
    fn identical_lines_have_no_emphasis() {
        let diff = inline_diff("same text", "same text");
        assert!(!diff.has_changes());
        assert_eq!(join(&diff.new), "same text");
    }
}
