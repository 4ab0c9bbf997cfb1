//! Coordinator: the single-threaded cooperative loop owning all state.
//!
//! Every document, pipeline, session, and notification lives here, on one
//! thread. Backends run elsewhere and report back over the event channel;
//! the embedder drives the loop by calling user-action methods, `tick`
//! with the current time, and `pump` to drain completed backend work.
//! Because every mutation runs to completion before the next event is
//! taken, no component ever observes another mid-mutation.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;

use log::{debug, info};

use crate::config::Config;
use crate::core::annotate::{Annotation, Annotator, LintAnnotator};
use crate::core::backend::{CompletionBackend, ConversationalBackend, ExecutionBackend};
use crate::core::conversation::{ConversationSession, ConversationTurn, ReplyOutcome, Scope};
use crate::core::document::{Cursor, Document};
use crate::core::error::CoreError;
use crate::core::event::CoreEvent;
use crate::core::id::{DocumentId, ExecutionCounter, TurnId};
use crate::core::interpreter::{ExecEvent, InterpreterSession, SessionState};
use crate::core::persistence::{DocumentStore, FileStore};
use crate::core::suggestion::{ResponseOutcome, Suggestion, SuggestionPipeline};

/// A user-visible, dismissible message. Conflicts resolved silently by
/// their owning component never become notifications; failures the user
/// should know about do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
}

/// One open document with its per-document collaborators.
struct DocumentSlot {
    document: Document,
    suggestions: SuggestionPipeline,
    conversation: ConversationSession,
    annotations: Vec<Annotation>,
}

/// The coordination core. Owns all mutable state; see the module docs
/// for the threading contract.
pub struct Coordinator {
    config: Config,
    documents: HashMap<DocumentId, DocumentSlot>,
    next_document: u64,
    completion: Box<dyn CompletionBackend>,
    conversational: Box<dyn ConversationalBackend>,
    interpreter: InterpreterSession,
    annotator: Box<dyn Annotator>,
    store: Box<dyn DocumentStore>,
    notifications: VecDeque<Notification>,
    events_tx: Sender<CoreEvent>,
    events_rx: Receiver<CoreEvent>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        completion: Box<dyn CompletionBackend>,
        conversational: Box<dyn ConversationalBackend>,
        execution: Box<dyn ExecutionBackend>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            config,
            documents: HashMap::new(),
            next_document: 0,
            completion,
            conversational,
            interpreter: InterpreterSession::new(execution),
            annotator: Box::new(LintAnnotator::new()),
            store: Box::new(FileStore::new()),
            notifications: VecDeque::new(),
            events_tx,
            events_rx,
        }
    }

    // ==================== Documents ====================

    pub fn open_document(&mut self, text: &str) -> DocumentId {
        let id = DocumentId(self.next_document);
        self.next_document += 1;
        let document = Document::from_text(id, text);
        let annotations = self.annotator.annotate(text);
        self.documents.insert(
            id,
            DocumentSlot {
                document,
                suggestions: SuggestionPipeline::new(id, &self.config),
                conversation: ConversationSession::new(id, &self.config),
                annotations,
            },
        );
        info!("opened {} ({} bytes)", id, text.len());
        id
    }

    pub fn open_file(&mut self, path: &Path) -> Result<DocumentId, CoreError> {
        let text = self.store.load(path)?;
        Ok(self.open_document(&text))
    }

    pub fn save_file(&mut self, id: DocumentId, path: &Path) -> Result<(), CoreError> {
        let slot = self
            .documents
            .get(&id)
            .ok_or(CoreError::UnknownDocument(id))?;
        let text = slot.document.text();
        // Only a save that actually landed clears the dirty flag
        self.store.save(path, &text)?;
        if let Some(slot) = self.documents.get_mut(&id) {
            slot.document.dirty = false;
        }
        Ok(())
    }

    pub fn close_document(&mut self, id: DocumentId) {
        self.documents.remove(&id);
    }

    // ==================== User edits ====================

    /// Replace `range` with `text` as a direct user edit. Restarts the
    /// completion debounce and refreshes annotations.
    pub fn edit(
        &mut self,
        id: DocumentId,
        range: std::ops::Range<usize>,
        text: &str,
        now: Instant,
    ) -> Result<u64, CoreError> {
        // Field-level lookup so `self.annotator` stays borrowable
        let slot = self
            .documents
            .get_mut(&id)
            .ok_or(CoreError::UnknownDocument(id))?;
        let version = slot.document.apply_user_edit(range, text)?;
        slot.suggestions.on_edit(now);
        slot.annotations = self.annotator.annotate(&slot.document.text());
        Ok(version)
    }

    pub fn move_cursor(&mut self, id: DocumentId, cursor: Cursor) -> Result<(), CoreError> {
        let slot = self.slot_mut(id)?;
        slot.document.set_cursor(cursor);
        slot.suggestions.on_cursor_moved();
        Ok(())
    }

    /// Undo the most recent committed mutation, any origin.
    pub fn undo(&mut self, id: DocumentId, now: Instant) -> Result<bool, CoreError> {
        let slot = self
            .documents
            .get_mut(&id)
            .ok_or(CoreError::UnknownDocument(id))?;
        let changed = slot.document.undo();
        if changed {
            slot.suggestions.on_edit(now);
            slot.annotations = self.annotator.annotate(&slot.document.text());
        }
        Ok(changed)
    }

    pub fn redo(&mut self, id: DocumentId, now: Instant) -> Result<bool, CoreError> {
        let slot = self
            .documents
            .get_mut(&id)
            .ok_or(CoreError::UnknownDocument(id))?;
        let changed = slot.document.redo();
        if changed {
            slot.suggestions.on_edit(now);
            slot.annotations = self.annotator.annotate(&slot.document.text());
        }
        Ok(changed)
    }

    // ==================== Suggestions ====================

    pub fn accept_suggestion(&mut self, id: DocumentId) -> Result<u64, CoreError> {
        let slot = self
            .documents
            .get_mut(&id)
            .ok_or(CoreError::UnknownDocument(id))?;
        let result = slot.suggestions.accept(&mut slot.document);
        if result.is_ok() {
            slot.annotations = self.annotator.annotate(&slot.document.text());
        }
        result
    }

    pub fn dismiss_suggestion(&mut self, id: DocumentId) -> Result<(), CoreError> {
        self.slot_mut(id)?.suggestions.dismiss();
        Ok(())
    }

    // ==================== Conversation ====================

    /// Submit a natural-language instruction scoped to the whole document
    /// or the current selection.
    pub fn submit_instruction(
        &mut self,
        id: DocumentId,
        instruction: &str,
        scope: Scope,
    ) -> Result<TurnId, CoreError> {
        let slot = self
            .documents
            .get_mut(&id)
            .ok_or(CoreError::UnknownDocument(id))?;
        let (turn, request) = slot
            .conversation
            .submit(instruction, scope, &slot.document)?;
        if let Some(request) = request {
            let cancel = self
                .conversational
                .request_edit(request, self.events_tx.clone());
            slot.conversation.attach_cancel(cancel);
        }
        Ok(turn)
    }

    pub fn cancel_conversation(&mut self, id: DocumentId) -> Result<(), CoreError> {
        self.slot_mut(id)?.conversation.cancel();
        Ok(())
    }

    // ==================== Interpreter ====================

    pub fn connect_interpreter(&mut self) -> Result<(), CoreError> {
        self.interpreter.connect(self.events_tx.clone())
    }

    pub fn execute(&mut self, code: &str) -> Result<ExecutionCounter, CoreError> {
        self.interpreter.execute(code)
    }

    pub fn interrupt_execution(&mut self) {
        self.interpreter.interrupt();
    }

    pub fn restart_interpreter(&mut self) -> Result<(), CoreError> {
        self.interpreter.restart()
    }

    /// Tear everything down. Documents stay readable; backends stop.
    pub fn shutdown(&mut self) {
        self.interpreter.stop();
    }

    // ==================== Loop ====================

    /// Advance time-based state: fire any debounce whose quiet period has
    /// elapsed and hand the resulting requests to the completion backend.
    pub fn tick(&mut self, now: Instant) {
        for slot in self.documents.values_mut() {
            if let Some(request) = slot.suggestions.take_due(now, &slot.document) {
                let cancel = self
                    .completion
                    .request_completion(request, self.events_tx.clone());
                slot.suggestions.attach_cancel(cancel);
            }
        }
    }

    /// Drain completed backend work into state changes. Call after `tick`
    /// and after any point where backends may have answered.
    pub fn pump(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::CompletionReady {
                document,
                request,
                result,
            } => {
                let Some(slot) = self.documents.get_mut(&document) else {
                    return;
                };
                let outcome = slot.suggestions.on_response(request, result, &slot.document);
                if let ResponseOutcome::Failed(message) = outcome {
                    push_notification(
                        &mut self.notifications,
                        self.config.notification_limit,
                        format!("completion failed: {message}"),
                    );
                }
            }
            CoreEvent::EditReady {
                document,
                turn,
                result,
            } => {
                let Some(slot) = self.documents.get_mut(&document) else {
                    return;
                };
                let (outcome, next) = slot.conversation.on_reply(turn, result, &mut slot.document);
                match &outcome {
                    ReplyOutcome::Committed { version } => {
                        debug!("{}: {} committed version {}", document, turn, version);
                        slot.annotations = self.annotator.annotate(&slot.document.text());
                    }
                    ReplyOutcome::Conflict => {
                        push_notification(
                            &mut self.notifications,
                            self.config.notification_limit,
                            format!("{turn}: edit discarded, it overlapped your changes"),
                        );
                    }
                    ReplyOutcome::Failed(message) => {
                        push_notification(
                            &mut self.notifications,
                            self.config.notification_limit,
                            format!("edit failed: {message}"),
                        );
                    }
                    ReplyOutcome::Ignored => {}
                }
                if let Some(request) = next {
                    let cancel = self
                        .conversational
                        .request_edit(request, self.events_tx.clone());
                    slot.conversation.attach_cancel(cancel);
                }
            }
            CoreEvent::Exec(signal) => {
                self.interpreter.on_signal(signal);
            }
        }
    }

    // ==================== Render state ====================

    pub fn document(&self, id: DocumentId) -> Option<&Document> {
        self.documents.get(&id).map(|s| &s.document)
    }

    pub fn annotations(&self, id: DocumentId) -> &[Annotation] {
        self.documents
            .get(&id)
            .map(|s| s.annotations.as_slice())
            .unwrap_or(&[])
    }

    pub fn suggestion(&self, id: DocumentId) -> Option<&Suggestion> {
        self.documents.get(&id).and_then(|s| s.suggestions.surfaced())
    }

    pub fn turns(&self, id: DocumentId) -> &[ConversationTurn] {
        self.documents
            .get(&id)
            .map(|s| s.conversation.turns())
            .unwrap_or(&[])
    }

    pub fn transcript(&self) -> &[ExecEvent] {
        self.interpreter.transcript()
    }

    pub fn interpreter_state(&self) -> SessionState {
        self.interpreter.state()
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    pub fn dismiss_notifications(&mut self) {
        self.notifications.clear();
    }

    fn slot_mut(&mut self, id: DocumentId) -> Result<&mut DocumentSlot, CoreError> {
        self.documents
            .get_mut(&id)
            .ok_or(CoreError::UnknownDocument(id))
    }
}

fn push_notification(
    notifications: &mut VecDeque<Notification>,
    limit: usize,
    message: String,
) {
    if notifications.len() >= limit {
        notifications.pop_front();
    }
    notifications.push_back(Notification { message });
}
