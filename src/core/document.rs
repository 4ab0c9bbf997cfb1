//! Document Model: rope-backed text with a monotone version counter.
//!
//! The document is the single shared mutable resource of the core. It is
//! mutated only through `commit` and `apply_user_edit`, both atomic: a
//! patch either applies completely or not at all, and every committed
//! mutation increments `version` by exactly one. All other components
//! read snapshots and submit patches.

use ropey::Rope;
use std::collections::VecDeque;
use std::ops::Range;
use unicode_segmentation::UnicodeSegmentation;

use crate::core::error::CoreError;
use crate::core::id::DocumentId;
use crate::core::patch::{Patch, PatchOp, PatchOrigin};

/// Maximum undo stack depth to prevent OOM from unbounded undo history
const MAX_UNDO_DEPTH: usize = 10_000;

/// Committed patches retained for rebasing late backend responses. A
/// response older than this window fails conservatively.
const HISTORY_LIMIT: usize = 256;

/// Cursor as an anchor/head pair of byte offsets. A caret has
/// `anchor == head`; a selection covers `min..max` of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub anchor: usize,
    pub head: usize,
}

impl Cursor {
    pub fn caret(pos: usize) -> Self {
        Self {
            anchor: pos,
            head: pos,
        }
    }

    pub fn selection(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    pub fn has_selection(&self) -> bool {
        self.anchor != self.head
    }

    /// Covered byte range, normalized so start <= end.
    pub fn range(&self) -> Range<usize> {
        self.anchor.min(self.head)..self.anchor.max(self.head)
    }
}

/// How a committed mutation interacts with the undo stacks.
enum StackPolicy {
    /// Normal commit: push the inverse onto undo, clear redo.
    Record,
    /// An undo being applied: push the inverse onto redo.
    Undoing,
    /// A redo being applied: push the inverse onto undo, keep redo.
    Redoing,
}

/// Text, cursor, version counter, and undo history for one open document.
#[derive(Debug)]
pub struct Document {
    pub id: DocumentId,
    rope: Rope,
    /// Strictly increasing; incremented on every committed mutation.
    pub version: u64,
    cursor: Cursor,
    /// True once the text diverges from its last loaded/saved state.
    pub dirty: bool,
    /// Inverse patches of committed mutations, most recent last.
    undo_stack: VecDeque<Patch>,
    redo_stack: VecDeque<Patch>,
    /// Recently committed patches in commit order, for rebasing.
    history: VecDeque<Patch>,
}

impl Document {
    pub fn new(id: DocumentId) -> Self {
        Self::from_text(id, "")
    }

    pub fn from_text(id: DocumentId, text: &str) -> Self {
        Self {
            id,
            rope: Rope::from_str(text),
            version: 0,
            cursor: Cursor::caret(0),
            dirty: false,
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    // ==================== Snapshots ====================

    /// Text and version as one consistent pair. Every backend request
    /// carries this pair so staleness is a pure data comparison.
    pub fn snapshot(&self) -> (String, u64) {
        (self.rope.to_string(), self.version)
    }

    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    pub fn len(&self) -> usize {
        self.rope.len_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_bytes() == 0
    }

    /// Text within a byte range.
    pub fn slice(&self, range: Range<usize>) -> Result<String, CoreError> {
        let (start, end) = self.byte_range_to_char(&range)?;
        Ok(self.rope.slice(start..end).to_string())
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Move the cursor, clamping both ends to grapheme boundaries.
    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = Cursor {
            anchor: self.clamp_boundary(cursor.anchor),
            head: self.clamp_boundary(cursor.head),
        };
    }

    // ==================== Mutation ====================

    /// Commit a patch computed against a known version. Fails with
    /// `VersionConflict` when the document has moved on; the text, the
    /// cursor, and the undo stacks are untouched on failure.
    pub fn commit(&mut self, patch: &Patch) -> Result<u64, CoreError> {
        if patch.base_version != self.version {
            return Err(CoreError::VersionConflict {
                expected: patch.base_version,
                found: self.version,
            });
        }
        self.commit_with_policy(patch, StackPolicy::Record)
    }

    /// A direct user edit: replace `range` with `text`. Always commits
    /// against the current version, always increments it, and places the
    /// caret at the end of the typed text the way typing does.
    pub fn apply_user_edit(
        &mut self,
        range: Range<usize>,
        text: impl Into<String>,
    ) -> Result<u64, CoreError> {
        let text = text.into();
        let caret = range.start + text.len();
        let patch = Patch::replace(self.version, range, text, PatchOrigin::User);
        let version = self.commit(&patch)?;
        self.set_cursor(Cursor::caret(caret));
        Ok(version)
    }

    fn commit_with_policy(
        &mut self,
        patch: &Patch,
        policy: StackPolicy,
    ) -> Result<u64, CoreError> {
        // Validate every op and capture replaced text before touching the
        // rope, so failure leaves no partial application behind.
        let mut char_ranges = Vec::with_capacity(patch.ops.len());
        let mut prev_end = 0;
        for (i, op) in patch.ops.iter().enumerate() {
            if i > 0 && op.range.start < prev_end {
                return Err(CoreError::InvalidRange {
                    start: op.range.start,
                    end: op.range.end,
                    len: self.rope.len_bytes(),
                });
            }
            prev_end = op.range.end;
            char_ranges.push(self.byte_range_to_char(&op.range)?);
        }

        let mut inverse_ops = Vec::with_capacity(patch.ops.len());
        let mut delta: isize = 0;
        for (op, &(cs, ce)) in patch.ops.iter().zip(&char_ranges) {
            let start = (op.range.start as isize + delta) as usize;
            inverse_ops.push(PatchOp {
                range: start..start + op.replacement.len(),
                replacement: self.rope.slice(cs..ce).to_string(),
            });
            delta += op.replacement.len() as isize - op.range.len() as isize;
        }

        // Apply right-to-left so earlier char indices stay valid
        for (op, &(cs, ce)) in patch.ops.iter().zip(&char_ranges).rev() {
            self.rope.remove(cs..ce);
            self.rope.insert(cs, &op.replacement);
        }

        self.version += 1;
        self.dirty = true;

        self.history.push_back(patch.clone());
        if self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }

        let remapped = Cursor {
            anchor: remap_position(self.cursor.anchor, patch),
            head: remap_position(self.cursor.head, patch),
        };
        self.set_cursor(remapped);

        let inverse = Patch {
            base_version: self.version,
            ops: inverse_ops,
            origin: patch.origin,
        };
        match policy {
            StackPolicy::Record => {
                if self.undo_stack.len() >= MAX_UNDO_DEPTH {
                    self.undo_stack.pop_front();
                }
                self.undo_stack.push_back(inverse);
                self.redo_stack.clear();
            }
            StackPolicy::Undoing => {
                self.redo_stack.push_back(inverse);
            }
            StackPolicy::Redoing => {
                if self.undo_stack.len() >= MAX_UNDO_DEPTH {
                    self.undo_stack.pop_front();
                }
                self.undo_stack.push_back(inverse);
            }
        }

        Ok(self.version)
    }

    // ==================== Undo/Redo ====================

    /// Undo the most recent committed mutation. Rejected (conflicting)
    /// patches never reach the stack, so undo order matches commit order.
    pub fn undo(&mut self) -> bool {
        let Some(inverse) = self.undo_stack.pop_back() else {
            return false;
        };
        self.commit_with_policy(&inverse, StackPolicy::Undoing).is_ok()
    }

    pub fn redo(&mut self) -> bool {
        let Some(inverse) = self.redo_stack.pop_back() else {
            return false;
        };
        self.commit_with_policy(&inverse, StackPolicy::Redoing).is_ok()
    }

    // ==================== History ====================

    /// Patches committed after `version`, in commit order. `None` when the
    /// retained window no longer reaches back that far; callers treat that
    /// as a rebase failure rather than guessing.
    pub fn patches_since(&self, version: u64) -> Option<Vec<Patch>> {
        if version > self.version {
            return None;
        }
        if version == self.version {
            return Some(Vec::new());
        }
        let mut out: Vec<Patch> = self
            .history
            .iter()
            .rev()
            .take_while(|p| p.base_version >= version)
            .cloned()
            .collect();
        out.reverse();
        match out.first() {
            Some(first) if first.base_version == version => Some(out),
            _ => None,
        }
    }

    // ==================== Boundaries ====================

    /// Nearest grapheme boundary at or before `pos`. Context windows are
    /// clamped through this so a byte-sized window never splits a
    /// character.
    pub fn snap_boundary(&self, pos: usize) -> usize {
        self.clamp_boundary(pos)
    }

    fn byte_range_to_char(&self, range: &Range<usize>) -> Result<(usize, usize), CoreError> {
        let len = self.rope.len_bytes();
        if range.start > range.end || range.end > len {
            return Err(CoreError::InvalidRange {
                start: range.start,
                end: range.end,
                len,
            });
        }
        let start = self.rope.byte_to_char(range.start);
        let end = self.rope.byte_to_char(range.end);
        // byte_to_char floors mid-character offsets; round-trip to detect
        if self.rope.char_to_byte(start) != range.start
            || self.rope.char_to_byte(end) != range.end
        {
            return Err(CoreError::InvalidRange {
                start: range.start,
                end: range.end,
                len,
            });
        }
        Ok((start, end))
    }

    /// Snap a byte offset to the nearest grapheme boundary at or before it.
    fn clamp_boundary(&self, pos: usize) -> usize {
        let pos = pos.min(self.rope.len_bytes());
        let char_idx = self.rope.byte_to_char(pos);
        let floored = self.rope.char_to_byte(char_idx);

        // Grapheme snap within the containing line; grapheme clusters
        // never span line breaks.
        let line_idx = self.rope.byte_to_line(floored);
        let line_start = self.rope.line_to_byte(line_idx);
        let line = self.rope.line(line_idx).to_string();
        let local = floored - line_start;
        // The end of the line is itself a boundary
        if local >= line.len() {
            return line_start + line.len();
        }
        let mut best = 0;
        for (offset, _) in line.grapheme_indices(true) {
            if offset <= local {
                best = offset;
            } else {
                break;
            }
        }
        line_start + best
    }
}

/// Where a byte offset lands after a patch applies: positions after a
/// replaced range shift by the length delta; positions inside one snap to
/// the end of the replacement. An insertion exactly at the position does
/// not push it — this is the passive remap for patches the user did not
/// type; `apply_user_edit` places the caret explicitly.
pub fn remap_position(pos: usize, patch: &Patch) -> usize {
    let mut delta: isize = 0;
    for op in &patch.ops {
        let shifts = op.range.end < pos || (op.range.end == pos && !op.range.is_empty());
        if shifts {
            delta += op.replacement.len() as isize - op.range.len() as isize;
        } else if op.range.start < pos {
            return (op.range.start as isize + delta) as usize + op.replacement.len();
        } else {
            break;
        }
    }
    (pos as isize + delta) as usize
}
