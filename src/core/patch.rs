//! Patch Engine
//!
//! Computes and applies structured edits against a document snapshot.
//! `apply` is a pure function of `(text, patch)`: identical inputs always
//! produce identical output, which the replay-based tests rely on.
//! Whole-document agent rewrites are reduced to minimal line-level
//! patches so undo granularity survives a rewrite that touched two lines.

use std::ops::Range;

use similar::{DiffOp, TextDiff};

use crate::core::error::CoreError;

/// Who produced a patch. Rejected non-user patches never disturb the
/// undo history; user patches always commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOrigin {
    User,
    Suggestion,
    Agent,
}

/// One text replacement: `range` in the base text is replaced by
/// `replacement`. A pure insertion has an empty range; a pure deletion an
/// empty replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOp {
    /// Byte range in the base text, half-open.
    pub range: Range<usize>,
    pub replacement: String,
}

/// A structured, position-addressed set of replacements applied atomically
/// against a known document version.
///
/// Invariant: operations never overlap and are sorted by start offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Document version this patch was computed against.
    pub base_version: u64,
    pub ops: Vec<PatchOp>,
    pub origin: PatchOrigin,
}

impl Patch {
    /// Single-replacement patch, the shape of every user edit and every
    /// accepted suggestion.
    pub fn replace(
        base_version: u64,
        range: Range<usize>,
        replacement: impl Into<String>,
        origin: PatchOrigin,
    ) -> Self {
        Self {
            base_version,
            ops: vec![PatchOp {
                range,
                replacement: replacement.into(),
            }],
            origin,
        }
    }

    /// True when applying the patch would not change any text.
    pub fn is_noop(&self) -> bool {
        self.ops
            .iter()
            .all(|op| op.range.is_empty() && op.replacement.is_empty())
    }

    /// Net change in text length, in bytes.
    pub fn len_delta(&self) -> isize {
        self.ops
            .iter()
            .map(|op| op.replacement.len() as isize - op.range.len() as isize)
            .sum()
    }
}

/// Byte offset of the start of each inclusive-newline line, plus a final
/// sentinel equal to the text length.
fn line_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    let mut pos = 0;
    for line in text.split_inclusive('\n') {
        pos += line.len();
        offsets.push(pos);
    }
    // split_inclusive yields nothing for "", but the sentinel must exist
    if offsets.len() == 1 {
        offsets.push(0);
    }
    offsets
}

/// Compute a minimal line-level patch turning `old` into `new`.
///
/// Used to reduce a whole-scope agent rewrite to the lines that actually
/// changed, so a rewrite that touched two lines does not register as one
/// giant replacement.
pub fn compute(old: &str, new: &str, base_version: u64, origin: PatchOrigin) -> Patch {
    let diff = TextDiff::from_lines(old, new);
    let old_offsets = line_offsets(old);
    let new_offsets = line_offsets(new);

    let mut ops = Vec::new();
    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                ops.push(PatchOp {
                    range: old_offsets[old_index]..old_offsets[old_index + old_len],
                    replacement: String::new(),
                });
            }
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => {
                ops.push(PatchOp {
                    range: old_offsets[old_index]..old_offsets[old_index],
                    replacement: new[new_offsets[new_index]..new_offsets[new_index + new_len]]
                        .to_string(),
                });
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                ops.push(PatchOp {
                    range: old_offsets[old_index]..old_offsets[old_index + old_len],
                    replacement: new[new_offsets[new_index]..new_offsets[new_index + new_len]]
                        .to_string(),
                });
            }
        }
    }

    Patch {
        base_version,
        ops,
        origin,
    }
}

/// Validate that ops are sorted, non-overlapping, in bounds, and on
/// character boundaries of `text`.
fn check_ops(text: &str, ops: &[PatchOp]) -> Result<(), CoreError> {
    let len = text.len();
    let mut prev_end = 0;
    for (i, op) in ops.iter().enumerate() {
        let bad = op.range.start > op.range.end
            || op.range.end > len
            || (i > 0 && op.range.start < prev_end)
            || !text.is_char_boundary(op.range.start)
            || !text.is_char_boundary(op.range.end);
        if bad {
            return Err(CoreError::InvalidRange {
                start: op.range.start,
                end: op.range.end,
                len,
            });
        }
        prev_end = op.range.end;
    }
    Ok(())
}

/// Apply a patch to a text. Pure and deterministic; fails without side
/// effects if any op is out of bounds or off a character boundary.
pub fn apply(text: &str, patch: &Patch) -> Result<String, CoreError> {
    check_ops(text, &patch.ops)?;

    let mut out = String::with_capacity(
        (text.len() as isize + patch.len_delta()).max(0) as usize,
    );
    let mut cursor = 0;
    for op in &patch.ops {
        out.push_str(&text[cursor..op.range.start]);
        out.push_str(&op.replacement);
        cursor = op.range.end;
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}

/// Compute the inverse of `patch` with respect to the base text it was
/// applied to. Applying the result to `apply(text, patch)` reproduces
/// `text` exactly; this is what the undo stack stores.
pub fn invert(text: &str, patch: &Patch, base_version: u64) -> Result<Patch, CoreError> {
    check_ops(text, &patch.ops)?;

    let mut ops = Vec::with_capacity(patch.ops.len());
    let mut delta: isize = 0;
    for op in &patch.ops {
        let start = (op.range.start as isize + delta) as usize;
        ops.push(PatchOp {
            range: start..start + op.replacement.len(),
            replacement: text[op.range.clone()].to_string(),
        });
        delta += op.replacement.len() as isize - op.range.len() as isize;
    }

    Ok(Patch {
        base_version,
        ops,
        origin: patch.origin,
    })
}

/// Rebase a patch across the intervening patches committed since its base
/// version. Ops entirely before or after every intervening replacement
/// are shifted; any overlap rejects the whole patch with `RebaseConflict`
/// rather than attempting a partial merge.
pub fn rebase(
    patch: &Patch,
    intervening: &[Patch],
    to_version: u64,
) -> Result<Patch, CoreError> {
    let mut ops = patch.ops.clone();
    for iv in intervening {
        // Shifts are computed against the coordinates ops currently hold,
        // which are the base coordinates of `iv`; all of iv's ops share
        // that space, so deltas accumulate per target op before applying.
        let mut shifts = vec![0isize; ops.len()];
        for ivop in &iv.ops {
            let delta = ivop.replacement.len() as isize - ivop.range.len() as isize;
            for (op, shift) in ops.iter().zip(shifts.iter_mut()) {
                if ivop.range.end <= op.range.start {
                    *shift += delta;
                } else if ivop.range.start >= op.range.end {
                    // entirely after, no effect
                } else {
                    return Err(CoreError::RebaseConflict {
                        start: op.range.start,
                        end: op.range.end,
                    });
                }
            }
        }
        for (op, shift) in ops.iter_mut().zip(shifts) {
            op.range.start = (op.range.start as isize + shift) as usize;
            op.range.end = (op.range.end as isize + shift) as usize;
        }
    }

    Ok(Patch {
        base_version: to_version,
        ops,
        origin: patch.origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_apply_roundtrip() {
        let old = "fn main() {\n    println!(\"hi\");\n}\n";
        let new = "fn main() {\n    println!(\"hello\");\n    run();\n}\n";
        let patch = compute(old, new, 0, PatchOrigin::Agent);
        assert_eq!(apply(old, &patch).unwrap(), new);
    }

    #[test]
    fn test_compute_is_minimal() {
        let old = "a\nb\nc\nd\n";
        let new = "a\nB\nc\nd\n";
        let patch = compute(old, new, 0, PatchOrigin::Agent);
        // Only the changed line is touched
        assert_eq!(patch.ops.len(), 1);
        assert_eq!(patch.ops[0].range, 2..4);
        assert_eq!(patch.ops[0].replacement, "B\n");
    }

    #[test]
    fn test_compute_no_trailing_newline() {
        let old = "one\ntwo";
        let new = "one\ntwo\nthree";
        let patch = compute(old, new, 0, PatchOrigin::Agent);
        assert_eq!(apply(old, &patch).unwrap(), new);
    }

    #[test]
    fn test_compute_empty_sides() {
        let patch = compute("", "hello\n", 0, PatchOrigin::Agent);
        assert_eq!(apply("", &patch).unwrap(), "hello\n");

        let patch = compute("hello\n", "", 0, PatchOrigin::Agent);
        assert_eq!(apply("hello\n", &patch).unwrap(), "");

        let patch = compute("", "", 0, PatchOrigin::Agent);
        assert!(patch.is_noop());
    }

    #[test]
    fn test_apply_rejects_bad_ranges() {
        let patch = Patch::replace(0, 4..10, "x", PatchOrigin::User);
        assert!(matches!(
            apply("abc", &patch),
            Err(CoreError::InvalidRange { .. })
        ));

        // 1..2 splits the two-byte 'é'
        let patch = Patch::replace(0, 1..2, "x", PatchOrigin::User);
        assert!(apply("é", &patch).is_err());
    }

    #[test]
    fn test_invert_restores_text() {
        let old = "line one\nline two\nline three\n";
        let new = "line one\nLINE 2\nline three\nline four\n";
        let patch = compute(old, new, 0, PatchOrigin::Agent);
        let applied = apply(old, &patch).unwrap();
        let inverse = invert(old, &patch, 1).unwrap();
        assert_eq!(apply(&applied, &inverse).unwrap(), old);
    }

    #[test]
    fn test_rebase_shifts_across_earlier_insert() {
        // Patch replaces bytes 10..15; an intervening edit inserted 3
        // bytes at offset 2.
        let patch = Patch::replace(1, 10..15, "xyz", PatchOrigin::Agent);
        let iv = Patch::replace(1, 2..2, "abc", PatchOrigin::User);
        let rebased = rebase(&patch, &[iv], 2).unwrap();
        assert_eq!(rebased.ops[0].range, 13..18);
        assert_eq!(rebased.base_version, 2);
    }

    #[test]
    fn test_rebase_ignores_later_edit() {
        let patch = Patch::replace(1, 2..5, "xy", PatchOrigin::Agent);
        let iv = Patch::replace(1, 20..22, "", PatchOrigin::User);
        let rebased = rebase(&patch, &[iv], 2).unwrap();
        assert_eq!(rebased.ops[0].range, 2..5);
    }

    #[test]
    fn test_rebase_conflict_on_overlap() {
        let patch = Patch::replace(1, 10..20, "x", PatchOrigin::Agent);
        let iv = Patch::replace(1, 15..16, "EDIT", PatchOrigin::User);
        assert!(matches!(
            rebase(&patch, &[iv], 2),
            Err(CoreError::RebaseConflict { .. })
        ));
    }

    #[test]
    fn test_rebase_insertion_inside_range_conflicts() {
        let patch = Patch::replace(1, 10..20, "x", PatchOrigin::Agent);
        let iv = Patch::replace(1, 12..12, "new", PatchOrigin::User);
        assert!(rebase(&patch, &[iv], 2).is_err());
    }

    #[test]
    fn test_len_delta() {
        let patch = Patch::replace(0, 3..5, "abcd", PatchOrigin::User);
        assert_eq!(patch.len_delta(), 2);
    }
}
