// EN: src/core/patch.rs

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use thiserror::Error;

lazy_static! {
    /// `@@ 12` or a unified-diff hunk header `@@ -12,3 +12,4 @@`.
    static ref ANCHOR_REGEX: Regex =
        Regex::new(r"^@@\s*-?(\d+)(?:,\d+)?(?:\s+\+\d+(?:,\d+)?)?\s*(?:@@.*)?$")
            .expect("Invalid regex for patch anchors");
}

/// Why a patch was refused. The file is never touched in that case.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PatchError {
    /// The patch text contains no lines at all.
    #[error("Patch is empty.")]
    Empty,
    /// A line could not be understood.
    #[error("Malformed patch line {line}: {text:?}")]
    Malformed {
        /// 1-based line inside the patch.
        line: usize,
        /// The offending line.
        text: String,
    },
    /// A `-` or context line did not match the file at the cursor.
    #[error(
        "Patch line {patch_line} expects file line {file_line} to be {expected:?}, found {found:?}"
    )]
    Mismatch {
        /// 1-based line inside the patch.
        patch_line: usize,
        /// 1-based line inside the file.
        file_line: usize,
        /// What the patch expected.
        expected: String,
        /// What the file holds there, if anything.
        found: Option<String>,
    },
    /// An anchor points before the cursor or past the end of the file.
    #[error("Patch line {patch_line}: anchor to line {target} is out of order or out of range")]
    BadAnchor {
        /// 1-based line inside the patch.
        patch_line: usize,
        /// The anchored file line.
        target: usize,
    },
}

/// The two mutating operations of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// Adds a line at the cursor.
    Insert,
    /// Drops the original line at the cursor.
    Remove,
}

/// One validated mutation, positioned against the original file (1-based).
/// For an insert, `line_number` is the original line the new text lands before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOp {
    /// Insert or remove.
    pub kind: PatchKind,
    /// 1-based position in the original file.
    pub line_number: usize,
    /// Inserted text, or the removed line's expected text.
    pub text: String,
}

/// A line of patch text, before it is checked against a file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PatchLine {
    Insert(String),
    Remove(String),
    Context(String),
    /// Jump forward to a 1-based original line, keeping the lines skipped over.
    Anchor(usize),
}

/// The outcome of checking a patch against a file: the new lines plus what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPlan {
    /// The complete patched file, line by line.
    pub lines: Vec<String>,
    /// The mutations that produced it, in application order.
    pub ops: Vec<PatchOp>,
}

impl PatchPlan {
    /// Whether applying the plan would change the file.
    pub fn is_noop(&self) -> bool {
        self.ops.is_empty()
    }
}

impl fmt::Display for PatchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inserted = self.ops.iter().filter(|o| o.kind == PatchKind::Insert).count();
        write!(
            f,
            "{} line(s) inserted, {} line(s) removed",
            inserted,
            self.ops.len() - inserted
        )
    }
}

fn parse_patch(patch_text: &str) -> Result<Vec<PatchLine>, PatchError> {
    let mut parsed = Vec::new();
    for (i, raw) in patch_text.lines().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let entry = if let Some(text) = line.strip_prefix('+') {
            PatchLine::Insert(text.to_string())
        } else if let Some(text) = line.strip_prefix('-') {
            PatchLine::Remove(text.to_string())
        } else if line.starts_with("@@") {
            let target = ANCHOR_REGEX
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .ok_or_else(|| PatchError::Malformed {
                    line: i + 1,
                    text: line.to_string(),
                })?;
            PatchLine::Anchor(target)
        } else {
            PatchLine::Context(line.to_string())
        };
        parsed.push(entry);
    }
    if parsed.is_empty() {
        return Err(PatchError::Empty);
    }
    Ok(parsed)
}

/// Validates a patch against the original lines and computes the patched file.
///
/// A single cursor walks the original:
/// - `+text` inserts `text` at the cursor;
/// - `-text` requires the line at the cursor to equal `text`, drops it, advances;
/// - any other line is context: it must equal the line at the cursor, which is kept;
/// - `@@ N` (or a unified `@@ -N,M +K,L @@` header) keeps lines up to original line `N`.
///
/// Everything is computed on a copy; `original` is never modified, and any mismatch
/// rejects the whole patch.
pub fn plan_patch(original: &[String], patch_text: &str) -> Result<PatchPlan, PatchError> {
    let patch = parse_patch(patch_text)?;
    let mut output: Vec<String> = Vec::with_capacity(original.len() + patch.len());
    let mut ops = Vec::new();
    let mut cursor = 0usize;

    for (i, entry) in patch.into_iter().enumerate() {
        let patch_line = i + 1;
        match entry {
            PatchLine::Insert(text) => {
                ops.push(PatchOp {
                    kind: PatchKind::Insert,
                    line_number: cursor + 1,
                    text: text.clone(),
                });
                output.push(text);
            }
            PatchLine::Remove(expected) | PatchLine::Context(expected)
                if original.get(cursor) != Some(&expected) =>
            {
                return Err(PatchError::Mismatch {
                    patch_line,
                    file_line: cursor + 1,
                    expected,
                    found: original.get(cursor).cloned(),
                });
            }
            PatchLine::Remove(text) => {
                ops.push(PatchOp {
                    kind: PatchKind::Remove,
                    line_number: cursor + 1,
                    text,
                });
                cursor += 1;
            }
            PatchLine::Context(text) => {
                output.push(text);
                cursor += 1;
            }
            PatchLine::Anchor(target) => {
                let stop = target.saturating_sub(1);
                if stop < cursor || stop > original.len() {
                    return Err(PatchError::BadAnchor { patch_line, target });
                }
                output.extend(original.iter().skip(cursor).take(stop - cursor).cloned());
                cursor = stop;
            }
        }
    }

    output.extend(original.iter().skip(cursor).cloned());
    Ok(PatchPlan { lines: output, ops })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_remove_and_context_from_top() {
        let original = lines(&["a", "b", "c"]);
        let plan = plan_patch(&original, "a\n-b\n+B\n+B2\nc\n").unwrap();
        assert_eq!(plan.lines, lines(&["a", "B", "B2", "c"]));
        assert_eq!(plan.ops.len(), 3);
        assert_eq!(
            plan.ops[0],
            PatchOp {
                kind: PatchKind::Remove,
                line_number: 2,
                text: "b".to_string()
            }
        );
        assert_eq!(plan.ops[1].kind, PatchKind::Insert);
        assert_eq!(plan.ops[1].line_number, 3);
        assert_eq!(plan.to_string(), "2 line(s) inserted, 1 line(s) removed");
    }

    #[test]
    fn test_untouched_tail_is_kept() {
        let original = lines(&["a", "b", "c", "d"]);
        let plan = plan_patch(&original, "+first").unwrap();
        assert_eq!(plan.lines, lines(&["first", "a", "b", "c", "d"]));
    }

    #[test]
    fn test_anchor_skips_forward() {
        let original = lines(&["1", "2", "3", "4", "5"]);
        let plan = plan_patch(&original, "@@ 4\n-4\n+four\n@@ -5,1 +5,1 @@\n-5").unwrap();
        assert_eq!(plan.lines, lines(&["1", "2", "3", "four"]));
    }

    #[test]
    fn test_anchor_backwards_is_rejected() {
        let original = lines(&["1", "2", "3"]);
        let result = plan_patch(&original, "@@ 3\n@@ 1\n+x");
        assert_eq!(
            result,
            Err(PatchError::BadAnchor {
                patch_line: 2,
                target: 1
            })
        );
    }

    #[test]
    fn test_mismatched_remove_rejects_whole_patch() {
        let original = lines(&["keep", "old"]);
        let result = plan_patch(&original, "+inserted\nkeep\n-not old");
        assert!(matches!(
            result,
            Err(PatchError::Mismatch {
                patch_line: 3,
                file_line: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_remove_past_end_is_a_mismatch() {
        let original = lines(&["only"]);
        let result = plan_patch(&original, "only\n-ghost");
        assert!(matches!(result, Err(PatchError::Mismatch { found: None, .. })));
    }

    #[test]
    fn test_malformed_anchor_and_empty_patch() {
        let original = lines(&["a"]);
        assert!(matches!(
            plan_patch(&original, "@@ nonsense"),
            Err(PatchError::Malformed { line: 1, .. })
        ));
        assert_eq!(plan_patch(&original, ""), Err(PatchError::Empty));
    }

    #[test]
    fn test_context_only_patch_is_noop() {
        let original = lines(&["a", "b"]);
        let plan = plan_patch(&original, "a\nb").unwrap();
        assert!(plan.is_noop());
        assert_eq!(plan.lines, original);
    }
}
