//! Interpreter Session: ordered code execution over a pluggable backend.
//!
//! The session assigns each execution a monotonically increasing counter
//! and guarantees that all events of execution N are delivered before any
//! event of execution N+1. Ordering needs no reassembly buffer: the
//! session hands the backend exactly one execution at a time and tags the
//! backend's untagged signals with the active counter as they arrive.

use std::collections::VecDeque;
use std::sync::mpsc::Sender;

use log::{info, warn};

use crate::core::backend::ExecutionBackend;
use crate::core::error::CoreError;
use crate::core::event::{CoreEvent, ExecSignal};
use crate::core::id::ExecutionCounter;

/// Connection lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Starting,
    Ready,
    Busy,
    Restarting,
}

/// One tagged, ordered entry of the execution transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecEvent {
    pub counter: ExecutionCounter,
    /// Position within the execution's stream, starting at 0.
    pub seq: u64,
    pub kind: ExecEventKind,
}

/// What happened within one execution's stream. `Error` and `Done` are
/// terminal; nothing follows them for the same counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEventKind {
    Stdout(String),
    Value(String),
    Error { message: String, interrupted: bool },
    Done,
}

struct Active {
    counter: ExecutionCounter,
    next_seq: u64,
}

/// Owns the execution backend and the pending-execution queue for one
/// workspace-wide interpreter.
pub struct InterpreterSession {
    backend: Box<dyn ExecutionBackend>,
    state: SessionState,
    /// Counter for the next execution; restart resets it so the first
    /// execution after a restart is `In[1]` again.
    next_counter: u64,
    queue: VecDeque<(ExecutionCounter, String)>,
    active: Option<Active>,
    transcript: Vec<ExecEvent>,
}

impl InterpreterSession {
    pub fn new(backend: Box<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            state: SessionState::Disconnected,
            next_counter: 1,
            queue: VecDeque::new(),
            active: None,
            transcript: Vec::new(),
        }
    }

    // ==================== Lifecycle ====================

    /// Begin connecting. The session becomes usable when the backend's
    /// `Ready` signal arrives.
    pub fn connect(&mut self, events: Sender<CoreEvent>) -> Result<(), CoreError> {
        if self.state != SessionState::Disconnected {
            return Ok(());
        }
        self.backend.start(events)?;
        // A reconnect is a fresh session; numbering starts over
        self.next_counter = 1;
        self.state = SessionState::Starting;
        Ok(())
    }

    /// Tear down and come back up with fresh state. Queued executions are
    /// discarded, the in-flight one gets a synthesized terminal error, and
    /// the counter resets so the next execution is `In[1]`.
    pub fn restart(&mut self) -> Result<(), CoreError> {
        if self.state == SessionState::Disconnected {
            return Err(CoreError::Disconnected);
        }
        info!("restarting interpreter session");
        self.backend.restart()?;
        if let Some(active) = self.active.take() {
            self.push_event(
                active.counter,
                active.next_seq,
                ExecEventKind::Error {
                    message: "session restarted".into(),
                    interrupted: false,
                },
            );
        }
        self.fail_queued("session restarted");
        self.next_counter = 1;
        self.state = SessionState::Restarting;
        Ok(())
    }

    /// Tear down for good. Reconnecting afterwards is an explicit
    /// `connect` call, never automatic.
    pub fn stop(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.backend.stop();
        self.disconnect("session stopped");
    }

    // ==================== Execution ====================

    /// Queue one piece of code for execution and return its counter.
    /// Refused only while disconnected; a busy or starting session queues.
    pub fn execute(&mut self, code: impl Into<String>) -> Result<ExecutionCounter, CoreError> {
        if self.state == SessionState::Disconnected {
            return Err(CoreError::Disconnected);
        }
        let counter = ExecutionCounter(self.next_counter);
        self.next_counter += 1;
        self.queue.push_back((counter, code.into()));
        self.pump();
        Ok(counter)
    }

    /// Best-effort interrupt of the running execution. Its stream
    /// terminates with an interrupted error when the backend complies.
    pub fn interrupt(&mut self) {
        if self.active.is_some() {
            self.backend.interrupt();
        }
    }

    // ==================== Signals ====================

    /// A raw backend signal re-entered the loop: tag it with the active
    /// counter and advance the queue on stream terminators.
    pub fn on_signal(&mut self, signal: ExecSignal) {
        match signal {
            ExecSignal::Ready => {
                self.state = SessionState::Ready;
                self.pump();
            }
            ExecSignal::Stdout(text) => self.push_active(ExecEventKind::Stdout(text)),
            ExecSignal::Value(text) => self.push_active(ExecEventKind::Value(text)),
            ExecSignal::Failure {
                message,
                interrupted,
            } => {
                self.finish_active(ExecEventKind::Error {
                    message,
                    interrupted,
                });
            }
            ExecSignal::Finished => {
                self.finish_active(ExecEventKind::Done);
            }
            ExecSignal::ConnectionLost => {
                warn!("execution backend connection lost");
                self.disconnect("interpreter disconnected");
            }
        }
    }

    // ==================== Accessors ====================

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// All tagged events so far, in delivery order.
    pub fn transcript(&self) -> &[ExecEvent] {
        &self.transcript
    }

    /// Executions waiting behind the running one.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    // ==================== Internals ====================

    /// Submit the next queued execution when the backend is idle.
    fn pump(&mut self) {
        while self.active.is_none()
            && matches!(self.state, SessionState::Ready | SessionState::Busy)
        {
            let Some((counter, code)) = self.queue.pop_front() else {
                self.state = SessionState::Ready;
                return;
            };
            match self.backend.submit(&code) {
                Ok(()) => {
                    self.active = Some(Active {
                        counter,
                        next_seq: 0,
                    });
                    self.state = SessionState::Busy;
                }
                Err(err) => {
                    self.push_event(
                        counter,
                        0,
                        ExecEventKind::Error {
                            message: err.to_string(),
                            interrupted: false,
                        },
                    );
                }
            }
        }
    }

    fn push_active(&mut self, kind: ExecEventKind) {
        let Some(active) = &mut self.active else {
            // Banner or prompt noise outside any execution
            return;
        };
        let seq = active.next_seq;
        active.next_seq += 1;
        let counter = active.counter;
        self.push_event(counter, seq, kind);
    }

    fn finish_active(&mut self, terminal: ExecEventKind) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.push_event(active.counter, active.next_seq, terminal);
        self.state = SessionState::Ready;
        self.pump();
    }

    /// Fail everything outstanding and drop to `Disconnected`.
    fn disconnect(&mut self, message: &str) {
        if let Some(active) = self.active.take() {
            self.push_event(
                active.counter,
                active.next_seq,
                ExecEventKind::Error {
                    message: message.into(),
                    interrupted: false,
                },
            );
        }
        self.fail_queued(message);
        self.state = SessionState::Disconnected;
    }

    fn fail_queued(&mut self, message: &str) {
        while let Some((counter, _)) = self.queue.pop_front() {
            self.push_event(
                counter,
                0,
                ExecEventKind::Error {
                    message: message.into(),
                    interrupted: false,
                },
            );
        }
    }

    fn push_event(&mut self, counter: ExecutionCounter, seq: u64, kind: ExecEventKind) {
        self.transcript.push(ExecEvent { counter, seq, kind });
    }
}
