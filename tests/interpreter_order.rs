//! Interpreter ordering scenarios driven through the coordinator: the
//! execution backend is scripted by the test, which releases its signals
//! between pumps to exercise counter and stream ordering.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use tandem::config::Config;
use tandem::core::backend::{
    CancelHandle, CompletionBackend, CompletionRequest, ConversationalBackend, EditRequest,
    ExecutionBackend,
};
use tandem::core::coordinator::Coordinator;
use tandem::core::error::CoreError;
use tandem::core::event::{CoreEvent, ExecSignal};
use tandem::core::id::ExecutionCounter;
use tandem::core::interpreter::{ExecEventKind, SessionState};

struct NoCompletion;

impl CompletionBackend for NoCompletion {
    fn request_completion(
        &mut self,
        _request: CompletionRequest,
        _events: Sender<CoreEvent>,
    ) -> CancelHandle {
        CancelHandle::new()
    }
}

struct NoEdits;

impl ConversationalBackend for NoEdits {
    fn request_edit(&mut self, _request: EditRequest, _events: Sender<CoreEvent>) -> CancelHandle {
        CancelHandle::new()
    }
}

/// Records submissions and exposes the event sender so the test can
/// script the backend's signals.
#[derive(Clone, Default)]
struct Scripted {
    events: Arc<Mutex<Option<Sender<CoreEvent>>>>,
    submitted: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    fn send(&self, signal: ExecSignal) {
        let guard = self.events.lock().unwrap();
        let events = guard.as_ref().expect("backend started");
        events.send(CoreEvent::Exec(signal)).unwrap();
    }

    fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

impl ExecutionBackend for Scripted {
    fn start(&mut self, events: Sender<CoreEvent>) -> Result<(), CoreError> {
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn submit(&mut self, code: &str) -> Result<(), CoreError> {
        self.submitted.lock().unwrap().push(code.to_string());
        Ok(())
    }

    fn interrupt(&mut self) {}

    fn restart(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    fn stop(&mut self) {}
}

fn coordinator() -> (Coordinator, Scripted) {
    let backend = Scripted::default();
    let mut c = Coordinator::new(
        Config::default(),
        Box::new(NoCompletion),
        Box::new(NoEdits),
        Box::new(backend.clone()),
    );
    c.connect_interpreter().unwrap();
    backend.send(ExecSignal::Ready);
    c.pump();
    (c, backend)
}

#[test]
fn test_failing_then_succeeding_executions_stay_ordered() {
    let (mut c, backend) = coordinator();

    let first = c.execute("1/0").unwrap();
    let second = c.execute("print(2)").unwrap();
    assert_eq!(first, ExecutionCounter(1));
    assert_eq!(second, ExecutionCounter(2));

    // Only the first execution has reached the backend
    assert_eq!(backend.submitted(), ["1/0"]);

    backend.send(ExecSignal::Failure {
        message: "ZeroDivisionError: division by zero".into(),
        interrupted: false,
    });
    c.pump();

    // Its terminal error released the second execution
    assert_eq!(backend.submitted(), ["1/0", "print(2)"]);
    backend.send(ExecSignal::Stdout("2".into()));
    backend.send(ExecSignal::Finished);
    c.pump();

    // Every event of In[1] precedes every event of In[2]
    let counters: Vec<u64> = c.transcript().iter().map(|e| e.counter.0).collect();
    assert_eq!(counters, [1, 2, 2]);
    assert!(matches!(
        c.transcript()[0].kind,
        ExecEventKind::Error {
            interrupted: false,
            ..
        }
    ));
    assert_eq!(c.transcript()[1].kind, ExecEventKind::Stdout("2".into()));
    assert_eq!(c.transcript()[2].kind, ExecEventKind::Done);
}

#[test]
fn test_interrupt_then_next_counter() {
    let (mut c, backend) = coordinator();

    c.execute("while True: pass").unwrap();
    c.interrupt_execution();
    backend.send(ExecSignal::Failure {
        message: "KeyboardInterrupt".into(),
        interrupted: true,
    });
    c.pump();

    let next = c.execute("1 + 1").unwrap();
    assert_eq!(next, ExecutionCounter(2));
    backend.send(ExecSignal::Value("2".into()));
    backend.send(ExecSignal::Finished);
    c.pump();

    assert!(matches!(
        c.transcript()[0].kind,
        ExecEventKind::Error {
            interrupted: true,
            ..
        }
    ));
    assert_eq!(c.transcript()[1].counter, ExecutionCounter(2));
    assert_eq!(c.transcript()[1].kind, ExecEventKind::Value("2".into()));
}

#[test]
fn test_restart_resets_numbering() {
    let (mut c, backend) = coordinator();

    c.execute("x = 1").unwrap();
    backend.send(ExecSignal::Finished);
    c.pump();

    c.restart_interpreter().unwrap();
    backend.send(ExecSignal::Ready);
    c.pump();
    assert_eq!(c.interpreter_state(), SessionState::Ready);

    // Numbering restarts from In[1] after a restart
    assert_eq!(c.execute("y = 2").unwrap(), ExecutionCounter(1));
}

#[test]
fn test_connection_loss_fails_pending_and_requires_reconnect() {
    let (mut c, backend) = coordinator();

    c.execute("long_running()").unwrap();
    c.execute("queued()").unwrap();
    backend.send(ExecSignal::ConnectionLost);
    c.pump();

    assert_eq!(c.interpreter_state(), SessionState::Disconnected);
    assert!(matches!(
        c.execute("anything()"),
        Err(CoreError::Disconnected)
    ));
    // Both pending executions got terminal errors
    let errors = c
        .transcript()
        .iter()
        .filter(|e| matches!(e.kind, ExecEventKind::Error { .. }))
        .count();
    assert_eq!(errors, 2);

    // Reconnect is explicit and restores service
    c.connect_interpreter().unwrap();
    backend.send(ExecSignal::Ready);
    c.pump();
    assert_eq!(c.execute("back()").unwrap(), ExecutionCounter(1));
}
