//! Suggestion Pipeline
//!
//! As-you-type inline completion: debounce keystrokes, issue at most one
//! outstanding backend request per document, race the response against
//! new input, and surface the result only if the document has not moved.
//! A suggestion is never applied silently; acceptance is an explicit,
//! atomic commit.
//!
//! State machine per keystroke:
//! `Idle -> Debouncing -> Requesting -> {Ready, Stale, Failed}`

use std::time::{Duration, Instant};

use log::debug;

use crate::config::Config;
use crate::core::backend::{CancelHandle, CompletionRequest};
use crate::core::document::{Cursor, Document};
use crate::core::error::CoreError;
use crate::core::id::{DocumentId, RequestId};
use crate::core::patch::{Patch, PatchOrigin};

/// Lifecycle of one proposed insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionState {
    /// Request issued, response outstanding.
    Pending,
    /// Response arrived against an unchanged document; surfaced for
    /// display.
    Ready,
    /// Invalidated by a newer request or a document/cursor change before
    /// the response arrived.
    Stale,
    /// Committed as a suggestion-origin patch.
    Accepted,
    /// Dropped by a cursor/content change or explicit dismissal after
    /// surfacing.
    Dismissed,
}

/// A proposed insertion at the cursor, tied to the exact document state
/// it was requested against.
#[derive(Debug, Clone)]
pub struct Suggestion {
    pub request: RequestId,
    pub cursor_at_request: usize,
    pub version_at_request: u64,
    /// Proposed insertion text; empty until the backend answers.
    pub text: String,
    pub state: SuggestionState,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Debouncing { deadline: Instant },
    Requesting { cancel: Option<CancelHandle> },
    Ready,
    Failed,
}

/// How a backend response was resolved; the coordinator only has to act
/// on `Failed` (dismissible notification).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Surfaced for display.
    Surfaced,
    /// Discarded: the document or cursor changed, or a newer request
    /// superseded this one.
    Stale,
    /// Backend returned no completion; nothing to show.
    Empty,
    /// Backend error or timeout; retried no earlier than the next
    /// debounce cycle.
    Failed(String),
}

/// Per-document completion pipeline.
#[derive(Debug)]
pub struct SuggestionPipeline {
    document: DocumentId,
    phase: Phase,
    current: Option<Suggestion>,
    next_request: u64,
    /// Cursor position of the last surfaced completion, for travel
    /// damping.
    last_surfaced_cursor: Option<usize>,
    debounce: Duration,
    min_context: usize,
    max_context: usize,
    min_cursor_travel: usize,
}

impl SuggestionPipeline {
    pub fn new(document: DocumentId, config: &Config) -> Self {
        Self {
            document,
            phase: Phase::Idle,
            current: None,
            next_request: 0,
            last_surfaced_cursor: None,
            debounce: config.debounce,
            min_context: config.completion_min_context,
            max_context: config.completion_max_context,
            min_cursor_travel: config.completion_min_cursor_travel,
        }
    }

    /// A qualifying edit: (re)start the quiet period and invalidate
    /// whatever was outstanding or surfaced.
    pub fn on_edit(&mut self, now: Instant) {
        self.invalidate("edit");
        self.phase = Phase::Debouncing {
            deadline: now + self.debounce,
        };
    }

    /// A cursor move without an edit: outstanding requests and surfaced
    /// suggestions are invalid, but no new debounce cycle starts.
    pub fn on_cursor_moved(&mut self) {
        match self.phase {
            Phase::Requesting { .. } | Phase::Ready => {
                self.invalidate("cursor move");
                self.phase = Phase::Idle;
            }
            _ => {}
        }
    }

    fn invalidate(&mut self, reason: &str) {
        if let Phase::Requesting { cancel } = &self.phase {
            debug!("{}: cancelling in-flight completion ({})", self.document, reason);
            if let Some(cancel) = cancel {
                cancel.cancel();
            }
        }
        if let Some(current) = &mut self.current {
            current.state = match current.state {
                SuggestionState::Pending => SuggestionState::Stale,
                SuggestionState::Ready => SuggestionState::Dismissed,
                other => other,
            };
        }
    }

    /// Fire the debounce if its deadline has passed, snapshotting the
    /// document and producing the request to hand to the backend. Damping
    /// rules may resolve the cycle to `Idle` without a request.
    pub fn take_due(&mut self, now: Instant, doc: &Document) -> Option<CompletionRequest> {
        let Phase::Debouncing { deadline } = self.phase else {
            return None;
        };
        if now < deadline {
            return None;
        }

        let cursor = doc.cursor();
        if cursor.has_selection() {
            self.phase = Phase::Idle;
            return None;
        }
        if doc.len() < self.min_context {
            debug!("{}: context below minimum, skipping completion", self.document);
            self.phase = Phase::Idle;
            return None;
        }
        if let Some(prev) = self.last_surfaced_cursor {
            if cursor.head.abs_diff(prev) < self.min_cursor_travel {
                debug!("{}: cursor travel too small, skipping completion", self.document);
                self.phase = Phase::Idle;
                return None;
            }
        }

        let head = cursor.head;
        let start = doc.snap_boundary(head.saturating_sub(self.max_context));
        let end = doc.snap_boundary((head + self.max_context).min(doc.len()));
        let prefix = doc.slice(start..head).unwrap_or_default();
        let suffix = doc.slice(head..end).unwrap_or_default();

        let request = RequestId(self.next_request);
        self.next_request += 1;
        self.current = Some(Suggestion {
            request,
            cursor_at_request: head,
            version_at_request: doc.version,
            text: String::new(),
            state: SuggestionState::Pending,
        });
        self.phase = Phase::Requesting { cancel: None };
        debug!(
            "{}: issuing completion {} at cursor {} version {}",
            self.document, request, head, doc.version
        );

        Some(CompletionRequest {
            document: self.document,
            request,
            prefix,
            suffix,
            cursor: head,
            version: doc.version,
        })
    }

    /// Attach the backend's cancel handle to the request just issued.
    pub fn attach_cancel(&mut self, handle: CancelHandle) {
        if let Phase::Requesting { cancel } = &mut self.phase {
            *cancel = Some(handle);
        }
    }

    /// A backend response re-entered the loop. Only the most recently
    /// issued request can ever surface, and only against an unchanged
    /// document.
    pub fn on_response(
        &mut self,
        request: RequestId,
        result: Result<String, CoreError>,
        doc: &Document,
    ) -> ResponseOutcome {
        let matches_current = self
            .current
            .as_ref()
            .is_some_and(|s| s.request == request && s.state == SuggestionState::Pending);
        if !matches_current || !matches!(self.phase, Phase::Requesting { .. }) {
            debug!("{}: ignoring stale completion response {}", self.document, request);
            return ResponseOutcome::Stale;
        }

        let text = match result {
            Ok(text) => text,
            Err(err) => {
                self.phase = Phase::Failed;
                if let Some(current) = &mut self.current {
                    current.state = SuggestionState::Stale;
                }
                return ResponseOutcome::Failed(err.to_string());
            }
        };

        let current = self.current.as_mut().expect("checked above");
        let unchanged = doc.version == current.version_at_request
            && !doc.cursor().has_selection()
            && doc.cursor().head == current.cursor_at_request;
        if !unchanged {
            debug!(
                "{}: completion {} stale (version/cursor moved)",
                self.document, request
            );
            current.state = SuggestionState::Stale;
            self.phase = Phase::Idle;
            return ResponseOutcome::Stale;
        }

        if text.is_empty() {
            self.current = None;
            self.phase = Phase::Idle;
            return ResponseOutcome::Empty;
        }

        current.text = text;
        current.state = SuggestionState::Ready;
        self.last_surfaced_cursor = Some(current.cursor_at_request);
        self.phase = Phase::Ready;
        ResponseOutcome::Surfaced
    }

    /// Commit the surfaced suggestion at the current cursor as a single
    /// atomic patch. On `VersionConflict` the suggestion is discarded
    /// rather than applied.
    pub fn accept(&mut self, doc: &mut Document) -> Result<u64, CoreError> {
        if !matches!(self.phase, Phase::Ready) {
            return Err(CoreError::BackendError("no suggestion to accept".into()));
        }
        let current = self.current.as_mut().expect("ready phase has a suggestion");

        let head = doc.cursor().head;
        let patch = Patch::replace(doc.version, head..head, current.text.clone(), PatchOrigin::Suggestion);
        match doc.commit(&patch) {
            Ok(version) => {
                current.state = SuggestionState::Accepted;
                // Caret lands after the inserted text, as if typed
                doc.set_cursor(Cursor::caret(head + current.text.len()));
                self.last_surfaced_cursor = Some(doc.cursor().head);
                self.current = None;
                self.phase = Phase::Idle;
                Ok(version)
            }
            Err(err) => {
                current.state = SuggestionState::Dismissed;
                self.current = None;
                self.phase = Phase::Idle;
                Err(err)
            }
        }
    }

    /// Drop a surfaced suggestion without applying it.
    pub fn dismiss(&mut self) {
        if matches!(self.phase, Phase::Ready) {
            if let Some(current) = &mut self.current {
                current.state = SuggestionState::Dismissed;
            }
            self.current = None;
            self.phase = Phase::Idle;
        }
    }

    /// The suggestion to display, if one is surfaced.
    pub fn surfaced(&self) -> Option<&Suggestion> {
        match self.phase {
            Phase::Ready => self.current.as_ref(),
            _ => None,
        }
    }

    /// True while a backend request is outstanding.
    pub fn is_requesting(&self) -> bool {
        matches!(self.phase, Phase::Requesting { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(text: &str) -> (Document, SuggestionPipeline, Instant) {
        let mut doc = Document::from_text(DocumentId(0), text);
        doc.set_cursor(Cursor::caret(text.len()));
        let config = Config::default();
        let pipeline = SuggestionPipeline::new(DocumentId(0), &config);
        (doc, pipeline, Instant::now())
    }

    #[test]
    fn test_debounce_fires_after_quiet_period() {
        let (doc, mut pipeline, t0) = setup("fn main() { let value = ");
        pipeline.on_edit(t0);
        assert!(pipeline.take_due(t0 + Duration::from_millis(50), &doc).is_none());
        let request = pipeline
            .take_due(t0 + Duration::from_millis(150), &doc)
            .expect("debounce should fire");
        assert_eq!(request.cursor, doc.cursor().head);
        assert!(pipeline.is_requesting());
    }

    #[test]
    fn test_edit_restarts_debounce() {
        let (doc, mut pipeline, t0) = setup("some reasonable context here");
        pipeline.on_edit(t0);
        pipeline.on_edit(t0 + Duration::from_millis(80));
        // First deadline has passed but the timer was restarted
        assert!(pipeline.take_due(t0 + Duration::from_millis(120), &doc).is_none());
        assert!(pipeline.take_due(t0 + Duration::from_millis(200), &doc).is_some());
    }

    #[test]
    fn test_short_context_suppresses_request() {
        let (doc, mut pipeline, t0) = setup("short");
        pipeline.on_edit(t0);
        assert!(pipeline.take_due(t0 + Duration::from_millis(150), &doc).is_none());
        assert!(!pipeline.is_requesting());
    }

    #[test]
    fn test_newer_edit_invalidates_outstanding_request() {
        let (mut doc, mut pipeline, t0) = setup("fn handle_events(queue: &mut ");
        pipeline.on_edit(t0);
        let request = pipeline.take_due(t0 + Duration::from_millis(150), &doc).unwrap();
        let cancel = CancelHandle::new();
        pipeline.attach_cancel(cancel.clone());

        // User types before the backend answers
        doc.apply_user_edit(doc.len()..doc.len(), ")").unwrap();
        pipeline.on_edit(t0 + Duration::from_millis(200));
        assert!(cancel.is_cancelled());

        let outcome = pipeline.on_response(request.request, Ok("Vec<Event>".into()), &doc);
        assert_eq!(outcome, ResponseOutcome::Stale);
        assert!(pipeline.surfaced().is_none());
    }

    #[test]
    fn test_response_surfaces_when_unchanged() {
        let (doc, mut pipeline, t0) = setup("let names: Vec<String> = ");
        pipeline.on_edit(t0);
        let request = pipeline.take_due(t0 + Duration::from_millis(150), &doc).unwrap();
        let outcome = pipeline.on_response(request.request, Ok("Vec::new();".into()), &doc);
        assert_eq!(outcome, ResponseOutcome::Surfaced);
        assert_eq!(pipeline.surfaced().unwrap().text, "Vec::new();");
    }

    #[test]
    fn test_stale_version_discards_response() {
        let (mut doc, mut pipeline, t0) = setup("let total = items.iter()");
        pipeline.on_edit(t0);
        let request = pipeline.take_due(t0 + Duration::from_millis(150), &doc).unwrap();
        doc.apply_user_edit(0..0, "// note\n").unwrap();
        let outcome = pipeline.on_response(request.request, Ok(".sum();".into()), &doc);
        assert_eq!(outcome, ResponseOutcome::Stale);
        assert!(pipeline.surfaced().is_none());
    }

    #[test]
    fn test_accept_commits_at_cursor() {
        let (mut doc, mut pipeline, t0) = setup("let names: Vec<String> = ");
        pipeline.on_edit(t0);
        let request = pipeline.take_due(t0 + Duration::from_millis(150), &doc).unwrap();
        pipeline.on_response(request.request, Ok("Vec::new();".into()), &doc);

        let before = doc.version;
        let version = pipeline.accept(&mut doc).unwrap();
        assert_eq!(version, before + 1);
        assert_eq!(doc.text(), "let names: Vec<String> = Vec::new();");
        // Caret sits after the accepted insertion
        assert_eq!(doc.cursor().head, doc.len());
        assert!(pipeline.surfaced().is_none());
    }

    #[test]
    fn test_failed_response_is_surfaced_as_failure() {
        let (doc, mut pipeline, t0) = setup("some reasonable context here");
        pipeline.on_edit(t0);
        let request = pipeline.take_due(t0 + Duration::from_millis(150), &doc).unwrap();
        let outcome =
            pipeline.on_response(request.request, Err(CoreError::BackendTimeout), &doc);
        assert!(matches!(outcome, ResponseOutcome::Failed(_)));
        assert!(pipeline.surfaced().is_none());
        // No retry until the next debounce cycle
        assert!(pipeline.take_due(t0 + Duration::from_secs(10), &doc).is_none());
    }

    #[test]
    fn test_cursor_travel_damping() {
        let (doc, mut pipeline, t0) = setup("let names: Vec<String> = ");
        pipeline.on_edit(t0);
        let request = pipeline.take_due(t0 + Duration::from_millis(150), &doc).unwrap();
        pipeline.on_response(request.request, Ok("Vec::new();".into()), &doc);
        pipeline.dismiss();

        // Cursor has not moved since the surfaced completion
        pipeline.on_edit(t0 + Duration::from_millis(300));
        assert!(pipeline.take_due(t0 + Duration::from_millis(500), &doc).is_none());
        assert!(!pipeline.is_requesting());
    }
}
