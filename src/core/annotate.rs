//! Document Annotation
//!
//! Synchronous per-document lint pass producing ranged annotations for
//! the frontend to render in the margin. Annotators run on the loop
//! thread after each committed mutation; they are expected to be cheap
//! and must never mutate the document.

use std::ops::Range;

use regex::Regex;

// =============================================================================
// ANNOTATION TYPES
// =============================================================================

/// Severity level of an annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// A ranged note attached to the current document text. Byte offsets are
/// valid only for the version they were computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub range: Range<usize>,
    pub severity: Severity,
    pub message: String,
}

/// Produces annotations for a full document text.
pub trait Annotator {
    fn annotate(&self, text: &str) -> Vec<Annotation>;
}

// =============================================================================
// LINT ANNOTATOR
// =============================================================================

/// Built-in language-agnostic lints: task markers and trailing
/// whitespace.
#[derive(Debug)]
pub struct LintAnnotator {
    marker: Regex,
    trailing: Regex,
}

impl LintAnnotator {
    pub fn new() -> Self {
        Self {
            marker: Regex::new(r"\b(TODO|FIXME|XXX)\b").unwrap(),
            trailing: Regex::new(r"[ \t]+$").unwrap(),
        }
    }
}

impl Default for LintAnnotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator for LintAnnotator {
    fn annotate(&self, text: &str) -> Vec<Annotation> {
        let mut out = Vec::new();
        let mut line_start = 0;
        for line in text.split_inclusive('\n') {
            let content = line.strip_suffix('\n').unwrap_or(line);
            let content = content.strip_suffix('\r').unwrap_or(content);
            for found in self.marker.find_iter(content) {
                out.push(Annotation {
                    range: line_start + found.start()..line_start + found.end(),
                    severity: Severity::Info,
                    message: format!("task marker: {}", found.as_str()),
                });
            }
            // Anchored at end-of-line, so this yields at most one match
            for found in self.trailing.find_iter(content) {
                out.push(Annotation {
                    range: line_start + found.start()..line_start + found.end(),
                    severity: Severity::Warning,
                    message: "trailing whitespace".into(),
                });
            }
            line_start += line.len();
        }
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_marker() {
        let lint = LintAnnotator::new();
        let notes = lint.annotate("fn f() {}\n// TODO handle errors\n");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].severity, Severity::Info);
        assert_eq!(notes[0].range, 13..17);
        assert!(notes[0].message.contains("TODO"));
    }

    #[test]
    fn test_trailing_whitespace() {
        let lint = LintAnnotator::new();
        let notes = lint.annotate("clean line\ndirty line   \n");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].severity, Severity::Warning);
        assert_eq!(notes[0].range, 21..24);
    }

    #[test]
    fn test_clean_text_has_no_annotations() {
        let lint = LintAnnotator::new();
        assert!(lint.annotate("fn main() {}\n").is_empty());
        assert!(lint.annotate("").is_empty());
    }

    #[test]
    fn test_last_line_without_newline() {
        let lint = LintAnnotator::new();
        let notes = lint.annotate("x\n// FIXME later");
        assert_eq!(notes.len(), 1);
        assert_eq!(&"x\n// FIXME later"[notes[0].range.clone()], "FIXME");
    }
}
