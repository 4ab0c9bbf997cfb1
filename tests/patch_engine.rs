//! Patch engine integration: compute/apply/invert/rebase composed with
//! the document's version counter and undo history.

use tandem::core::document::{Cursor, Document};
use tandem::core::error::CoreError;
use tandem::core::id::DocumentId;
use tandem::core::patch::{self, Patch, PatchOrigin};

#[test]
fn test_agent_rewrite_reduces_to_changed_lines() {
    let old = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\nfn main() {\n    add(1, 2);\n}\n";
    let new = "fn add(a: i32, b: i32) -> i32 {\n    a.wrapping_add(b)\n}\n\nfn main() {\n    add(1, 2);\n}\n";

    let p = patch::compute(old, new, 0, PatchOrigin::Agent);
    // Whole-document rewrite, one changed line, one op
    assert_eq!(p.ops.len(), 1);
    assert_eq!(patch::apply(old, &p).unwrap(), new);
}

#[test]
fn test_commit_invert_restores_previous_text() {
    let mut doc = Document::from_text(DocumentId(0), "alpha\nbeta\ngamma\n");
    let before = doc.text();

    let p = patch::compute(
        &before,
        "alpha\nBETA\ngamma\ndelta\n",
        doc.version,
        PatchOrigin::Agent,
    );
    let inverse = patch::invert(&before, &p, doc.version + 1).unwrap();
    doc.commit(&p).unwrap();
    assert_ne!(doc.text(), before);

    doc.commit(&inverse).unwrap();
    assert_eq!(doc.text(), before);
}

#[test]
fn test_undo_restores_text_after_agent_patch() {
    let mut doc = Document::from_text(DocumentId(0), "one\ntwo\nthree\n");
    let p = patch::compute(
        "one\ntwo\nthree\n",
        "one\n2\nthree\n",
        doc.version,
        PatchOrigin::Agent,
    );
    doc.commit(&p).unwrap();
    assert_eq!(doc.text(), "one\n2\nthree\n");

    assert!(doc.undo());
    assert_eq!(doc.text(), "one\ntwo\nthree\n");
}

#[test]
fn test_versions_are_gap_free_with_one_winner() {
    let mut doc = Document::from_text(DocumentId(0), "base text here\n");
    let racer_a = Patch::replace(doc.version, 0..4, "BASE", PatchOrigin::Suggestion);
    let racer_b = Patch::replace(doc.version, 5..9, "TEXT", PatchOrigin::Agent);

    let mut committed = 0;
    for p in [&racer_a, &racer_b] {
        match doc.commit(p) {
            Ok(_) => committed += 1,
            Err(CoreError::VersionConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    // Exactly one of two same-base patches wins, version counts commits
    assert_eq!(committed, 1);
    assert_eq!(doc.version, 1);
}

#[test]
fn test_rebase_chain_across_multiple_edits() {
    let mut doc = Document::from_text(DocumentId(0), "aaaa\nbbbb\ncccc\ndddd\n");
    let snapshot_version = doc.version;

    // Patch targets the "cccc" line as of the snapshot
    let p = Patch::replace(snapshot_version, 10..14, "CCCC", PatchOrigin::Agent);

    // Two disjoint edits land first
    doc.apply_user_edit(0..0, ">> ").unwrap();
    doc.apply_user_edit(doc.len()..doc.len(), "eeee\n").unwrap();

    let intervening = doc.patches_since(snapshot_version).unwrap();
    let rebased = patch::rebase(&p, &intervening, doc.version).unwrap();
    doc.commit(&rebased).unwrap();
    assert_eq!(doc.text(), ">> aaaa\nbbbb\nCCCC\ndddd\neeee\n");
}

#[test]
fn test_rebase_window_exhaustion_fails_closed() {
    let mut doc = Document::from_text(DocumentId(0), "seed\n");
    let snapshot_version = doc.version;
    for _ in 0..300 {
        doc.apply_user_edit(0..0, "x").unwrap();
    }
    // The retained history no longer reaches back to the snapshot
    assert!(doc.patches_since(snapshot_version).is_none());
}

#[test]
fn test_cursor_follows_committed_patches() {
    let mut doc = Document::from_text(DocumentId(0), "hello world\n");
    doc.set_cursor(Cursor::caret(11));

    let p = patch::compute(
        "hello world\n",
        "hi world\n",
        doc.version,
        PatchOrigin::Agent,
    );
    doc.commit(&p).unwrap();
    // Cursor inside the replaced range snaps to the replacement's end
    assert_eq!(doc.cursor().head, 9);
}
