//! Collaborative Edit Session
//!
//! Turns a natural-language instruction plus a document/selection context
//! into one committed patch, preserving conversational history for
//! multi-turn refinement. Unlike the suggestion pipeline, requests here
//! are never cancelled by new input: each represents a discrete,
//! user-intended instruction that either completes or is explicitly
//! cancelled. New submissions queue FIFO behind the in-flight one.

use std::collections::VecDeque;
use std::ops::Range;

use log::{debug, info};

use crate::config::Config;
use crate::core::backend::{CancelHandle, EditRequest};
use crate::core::document::Document;
use crate::core::error::CoreError;
use crate::core::id::{DocumentId, TurnId};
use crate::core::patch::{self, Patch, PatchOrigin};

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Agent,
}

/// What part of the document an instruction applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    WholeDocument,
    Selection(Range<usize>),
}

/// Resolution of an instruction turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Outstanding or queued.
    Pending,
    /// The agent's patch committed, producing this version.
    Committed { version: u64 },
    /// A concurrent user edit overlapped the patched range; the patch was
    /// discarded and the user's edit preserved verbatim.
    FailedConflict,
    /// Backend or application failure.
    Failed(String),
    /// Explicitly cancelled before completion.
    Cancelled,
}

/// One entry of the append-only conversation log.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    /// Document version the turn's patch, if any, was computed against.
    /// Set at dispatch time for queued instructions.
    pub target_version: Option<u64>,
    pub patch: Option<Patch>,
    pub outcome: TurnOutcome,
}

/// How a backend reply was resolved, for the coordinator to surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Committed { version: u64 },
    Conflict,
    Failed(String),
    /// Reply for a turn that is no longer in flight (cancelled earlier).
    Ignored,
}

#[derive(Debug)]
struct InFlight {
    turn: TurnId,
    scope_start: usize,
    scope_text: String,
    version: u64,
    cancel: Option<CancelHandle>,
}

#[derive(Debug)]
struct QueuedSubmission {
    turn: TurnId,
    instruction: String,
    scope: Scope,
}

/// Per-document conversation with the collaborative agent.
#[derive(Debug)]
pub struct ConversationSession {
    document: DocumentId,
    turns: Vec<ConversationTurn>,
    queue: VecDeque<QueuedSubmission>,
    in_flight: Option<InFlight>,
    next_turn: u64,
    queue_limit: usize,
}

impl ConversationSession {
    pub fn new(document: DocumentId, config: &Config) -> Self {
        Self {
            document,
            turns: Vec::new(),
            queue: VecDeque::new(),
            in_flight: None,
            next_turn: 0,
            queue_limit: config.conversation_queue_limit,
        }
    }

    /// Submit an instruction. Returns the new turn id and, when no other
    /// request is outstanding, the request to hand to the backend.
    pub fn submit(
        &mut self,
        instruction: impl Into<String>,
        scope: Scope,
        doc: &Document,
    ) -> Result<(TurnId, Option<EditRequest>), CoreError> {
        if self.queue.len() >= self.queue_limit {
            return Err(CoreError::BackendError(
                "conversation queue is full".into(),
            ));
        }
        let instruction = instruction.into();
        let id = TurnId(self.next_turn);
        self.next_turn += 1;
        self.turns.push(ConversationTurn {
            id,
            role: Role::User,
            content: instruction.clone(),
            target_version: None,
            patch: None,
            outcome: TurnOutcome::Pending,
        });

        if self.in_flight.is_some() {
            debug!("{}: queueing instruction behind in-flight turn", self.document);
            self.queue.push_back(QueuedSubmission {
                turn: id,
                instruction,
                scope,
            });
            return Ok((id, None));
        }

        let request = self.dispatch(id, instruction, scope, doc)?;
        Ok((id, Some(request)))
    }

    /// Snapshot the scope and build the backend request. The snapshot is
    /// taken at dispatch time so queued instructions see the results of
    /// the turns that ran before them.
    fn dispatch(
        &mut self,
        turn: TurnId,
        instruction: String,
        scope: Scope,
        doc: &Document,
    ) -> Result<EditRequest, CoreError> {
        let range = match scope {
            Scope::WholeDocument => 0..doc.len(),
            Scope::Selection(range) => range,
        };
        let scope_text = doc.slice(range.clone())?;
        let version = doc.version;
        self.set_turn_target(turn, version);
        self.in_flight = Some(InFlight {
            turn,
            scope_start: range.start,
            scope_text: scope_text.clone(),
            version,
            cancel: None,
        });
        info!(
            "{}: dispatching {} against version {}",
            self.document, turn, version
        );
        Ok(EditRequest {
            document: self.document,
            turn,
            scope_text,
            instruction,
            history: self
                .turns
                .iter()
                .filter(|t| t.id != turn)
                .map(|t| (t.role, t.content.clone()))
                .collect(),
            version,
        })
    }

    /// Attach the backend's cancel handle to the request just dispatched.
    pub fn attach_cancel(&mut self, handle: CancelHandle) {
        if let Some(in_flight) = &mut self.in_flight {
            in_flight.cancel = Some(handle);
        }
    }

    /// A backend reply re-entered the loop: compute the minimal patch
    /// against the dispatched snapshot, rebase across intervening edits,
    /// and commit. Overlap with a concurrent edit fails the turn; the
    /// user's edit wins. Returns the resolution plus the next queued
    /// request, if any.
    pub fn on_reply(
        &mut self,
        turn: TurnId,
        result: Result<String, CoreError>,
        doc: &mut Document,
    ) -> (ReplyOutcome, Option<EditRequest>) {
        let Some(in_flight) = self.in_flight.take() else {
            return (ReplyOutcome::Ignored, None);
        };
        if in_flight.turn != turn {
            self.in_flight = Some(in_flight);
            return (ReplyOutcome::Ignored, None);
        }

        let outcome = match result {
            Ok(replacement) => self.apply_reply(&in_flight, replacement, doc),
            Err(err) => {
                self.resolve_turn(turn, TurnOutcome::Failed(err.to_string()));
                ReplyOutcome::Failed(err.to_string())
            }
        };

        let next = self.dispatch_next(doc);
        (outcome, next)
    }

    fn apply_reply(
        &mut self,
        in_flight: &InFlight,
        replacement: String,
        doc: &mut Document,
    ) -> ReplyOutcome {
        let mut proposed = patch::compute(
            &in_flight.scope_text,
            &replacement,
            in_flight.version,
            PatchOrigin::Agent,
        );
        for op in &mut proposed.ops {
            op.range.start += in_flight.scope_start;
            op.range.end += in_flight.scope_start;
        }

        if proposed.is_noop() {
            // Agent answered without changing anything; record the reply
            self.resolve_turn(
                in_flight.turn,
                TurnOutcome::Committed {
                    version: doc.version,
                },
            );
            self.append_agent_turn(in_flight, replacement, None, doc.version);
            return ReplyOutcome::Committed {
                version: doc.version,
            };
        }

        let ready = if doc.version == in_flight.version {
            Ok(proposed)
        } else {
            match doc.patches_since(in_flight.version) {
                Some(intervening) => patch::rebase(&proposed, &intervening, doc.version),
                None => Err(CoreError::RebaseConflict { start: 0, end: 0 }),
            }
        };

        let patch = match ready {
            Ok(patch) => patch,
            Err(_) => {
                info!(
                    "{}: {} lost to a concurrent edit, discarding patch",
                    self.document, in_flight.turn
                );
                self.resolve_turn(in_flight.turn, TurnOutcome::FailedConflict);
                return ReplyOutcome::Conflict;
            }
        };

        match doc.commit(&patch) {
            Ok(version) => {
                self.resolve_turn(in_flight.turn, TurnOutcome::Committed { version });
                self.append_agent_turn(in_flight, replacement, Some(patch), version);
                ReplyOutcome::Committed { version }
            }
            Err(CoreError::VersionConflict { .. }) => {
                self.resolve_turn(in_flight.turn, TurnOutcome::FailedConflict);
                ReplyOutcome::Conflict
            }
            Err(err) => {
                self.resolve_turn(in_flight.turn, TurnOutcome::Failed(err.to_string()));
                ReplyOutcome::Failed(err.to_string())
            }
        }
    }

    fn append_agent_turn(
        &mut self,
        in_flight: &InFlight,
        content: String,
        patch: Option<Patch>,
        version: u64,
    ) {
        let id = TurnId(self.next_turn);
        self.next_turn += 1;
        self.turns.push(ConversationTurn {
            id,
            role: Role::Agent,
            content,
            target_version: Some(in_flight.version),
            patch,
            outcome: TurnOutcome::Committed { version },
        });
    }

    fn dispatch_next(&mut self, doc: &Document) -> Option<EditRequest> {
        while let Some(queued) = self.queue.pop_front() {
            match self.dispatch(queued.turn, queued.instruction, queued.scope, doc) {
                Ok(request) => return Some(request),
                Err(err) => {
                    // Stale selection range, for instance; fail and move on
                    self.in_flight = None;
                    self.resolve_turn(queued.turn, TurnOutcome::Failed(err.to_string()));
                }
            }
        }
        None
    }

    /// Abort the in-flight request, discard queued ones, and append a
    /// cancelled marker turn.
    pub fn cancel(&mut self) {
        let mut cancelled_any = false;
        if let Some(in_flight) = self.in_flight.take() {
            if let Some(cancel) = &in_flight.cancel {
                cancel.cancel();
            }
            self.resolve_turn(in_flight.turn, TurnOutcome::Cancelled);
            cancelled_any = true;
        }
        while let Some(queued) = self.queue.pop_front() {
            self.resolve_turn(queued.turn, TurnOutcome::Cancelled);
            cancelled_any = true;
        }
        if cancelled_any {
            let id = TurnId(self.next_turn);
            self.next_turn += 1;
            self.turns.push(ConversationTurn {
                id,
                role: Role::Agent,
                content: "[cancelled]".into(),
                target_version: None,
                patch: None,
                outcome: TurnOutcome::Cancelled,
            });
        }
    }

    fn set_turn_target(&mut self, id: TurnId, version: u64) {
        if let Some(turn) = self.turns.iter_mut().find(|t| t.id == id) {
            turn.target_version = Some(version);
        }
    }

    fn resolve_turn(&mut self, id: TurnId, outcome: TurnOutcome) {
        if let Some(turn) = self.turns.iter_mut().find(|t| t.id == id) {
            turn.outcome = outcome;
        }
    }

    /// The append-only conversation log.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// True while a backend request is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Number of submissions waiting behind the in-flight request.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
