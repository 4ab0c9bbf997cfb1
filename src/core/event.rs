//! Events re-entering the coordinator's loop.
//!
//! Backend work completes on other threads and reports back as discrete
//! `CoreEvent` values over an mpsc channel; the coordinator drains the
//! channel on its own thread, so every mutation is an atomic step of one
//! ordered loop. A cancelled or stale result arriving here is ignored by
//! the owning component, never applied.

use crate::core::error::CoreError;
use crate::core::id::{DocumentId, RequestId, TurnId};

/// A completion/edit result or failure from a backend, tagged with the
/// identifiers the owning component uses to detect staleness.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// Inline-completion backend answered (or failed) a request.
    CompletionReady {
        document: DocumentId,
        request: RequestId,
        result: Result<String, CoreError>,
    },
    /// Conversational backend produced replacement text for a turn.
    EditReady {
        document: DocumentId,
        turn: TurnId,
        result: Result<String, CoreError>,
    },
    /// Raw signal from the execution backend; the interpreter session
    /// tags it with the active execution counter.
    Exec(ExecSignal),
}

/// Untagged execution backend output. Ordering is guaranteed by the
/// session submitting at most one execution to the backend at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecSignal {
    /// Backend finished starting (or restarting) and can accept code.
    Ready,
    Stdout(String),
    /// A result value, distinct from stream output.
    Value(String),
    /// The current execution failed or was interrupted. Terminal for its
    /// stream.
    Failure { message: String, interrupted: bool },
    /// The current execution completed normally. Terminal for its stream.
    Finished,
    /// The backend process/connection is gone.
    ConnectionLost,
}
