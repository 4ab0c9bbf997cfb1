//! Error taxonomy for the coordination core.
//!
//! Conflicts are component-local and resolve to state transitions inside
//! the owning component; only backend-connectivity failures and explicit
//! user actions become user-visible notifications. No error may leave a
//! document partially patched.

use thiserror::Error;

use crate::core::id::DocumentId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// An operation named a document the coordinator does not hold.
    #[error("unknown document: {0}")]
    UnknownDocument(DocumentId),

    /// A patch's base version no longer matches the document. Recoverable:
    /// the patch is discarded and its owner notified.
    #[error("version conflict: patch targets version {expected}, document is at {found}")]
    VersionConflict { expected: u64, found: u64 },

    /// An intervening edit overlaps a patch's target range. The patch is
    /// discarded rather than guessed at.
    #[error("rebase conflict: concurrent edit overlaps patched range {start}..{end}")]
    RebaseConflict { start: usize, end: usize },

    /// A backend did not answer within its deadline.
    #[error("backend timed out")]
    BackendTimeout,

    /// A backend reported a provider or transport failure.
    #[error("backend error: {0}")]
    BackendError(String),

    /// The execution backend connection is gone. All queued and in-flight
    /// executions fail; reconnecting is an explicit user action.
    #[error("execution backend disconnected")]
    Disconnected,

    /// The user interrupted a running execution. Not a failure.
    #[error("execution interrupted")]
    Interrupted,

    /// A byte range does not fall on character boundaries or lies outside
    /// the text.
    #[error("invalid range {start}..{end} for text of length {len}")]
    InvalidRange { start: usize, end: usize, len: usize },

    /// Filesystem failure in the persistence collaborator.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}
