//! External interfaces: the pluggable backends the core coordinates.
//!
//! Backends are non-blocking: a request call returns immediately and the
//! result re-enters the event loop as a `CoreEvent`. Cancellation is
//! cooperative and advisory; a backend that ignores its cancel handle is
//! still safe because stale results are discarded on arrival.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use crate::core::conversation::Role;
use crate::core::error::CoreError;
use crate::core::event::CoreEvent;
use crate::core::id::{DocumentId, RequestId, TurnId};

/// Shared flag advising a backend that an outstanding request's result is
/// no longer wanted.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Context for one inline-completion request: a window of text around the
/// cursor plus the version/cursor snapshot used for staleness checks.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub document: DocumentId,
    pub request: RequestId,
    /// Up to `completion_max_context` bytes before the cursor.
    pub prefix: String,
    /// Up to `completion_max_context` bytes after the cursor.
    pub suffix: String,
    pub cursor: usize,
    pub version: u64,
}

/// Short text in, short text out. The caller guarantees at most one
/// outstanding call per document; the backend need not assume it.
pub trait CompletionBackend {
    /// Issue a request and return immediately. The result arrives as
    /// `CoreEvent::CompletionReady` carrying the same ids.
    fn request_completion(
        &mut self,
        request: CompletionRequest,
        events: Sender<CoreEvent>,
    ) -> CancelHandle;
}

/// Context for one conversational edit request: the scoped text, the
/// instruction, and the conversation so far.
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub document: DocumentId,
    pub turn: TurnId,
    /// The text in scope (whole document or selection) at snapshot time.
    pub scope_text: String,
    pub instruction: String,
    pub history: Vec<(Role, String)>,
    pub version: u64,
}

/// Document + instruction in, proposed replacement text out.
pub trait ConversationalBackend {
    /// Issue a request and return immediately. The result arrives as
    /// `CoreEvent::EditReady` carrying the same ids.
    fn request_edit(&mut self, request: EditRequest, events: Sender<CoreEvent>) -> CancelHandle;
}

/// A long-lived code execution backend (interpreter kernel, PTY shell).
/// Owned exclusively by the interpreter session; raw output re-enters the
/// loop as `CoreEvent::Exec` signals.
pub trait ExecutionBackend {
    /// Begin connecting. `ExecSignal::Ready` arrives when code can run.
    fn start(&mut self, events: Sender<CoreEvent>) -> Result<(), CoreError>;

    /// Run one piece of code. Called only after the previous submission's
    /// stream terminated; the session enforces this.
    fn submit(&mut self, code: &str) -> Result<(), CoreError>;

    /// Best-effort interrupt of the running execution.
    fn interrupt(&mut self);

    /// Tear down and come back up. `ExecSignal::Ready` arrives when done.
    fn restart(&mut self) -> Result<(), CoreError>;

    /// Tear down for good.
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_handle() {
        let handle = CancelHandle::new();
        let observer = handle.clone();
        assert!(!observer.is_cancelled());
        handle.cancel();
        assert!(observer.is_cancelled());
    }
}
