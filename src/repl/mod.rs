//! PTY-backed execution backend.
//!
//! Runs a shell inside a pseudo-terminal and adapts its byte stream to
//! the execution signal protocol: a reader thread splits output into
//! lines and forwards them over the event channel, and submitted code is
//! followed by a marker echo whose exit status terminates the stream.
//! The marker lines never reach the transcript.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;

use log::{info, warn};
use portable_pty::{Child, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem};

use crate::core::backend::ExecutionBackend;
use crate::core::error::CoreError;
use crate::core::event::{CoreEvent, ExecSignal};

const READY_MARKER: &str = "__TANDEM_READY__";
const DONE_MARKER: &str = "__TANDEM_DONE__";

// =============================================================================
// LINE CLASSIFICATION
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum LineKind {
    Ready,
    Done { status: i32 },
    Output(String),
}

/// Classify one line of PTY output. Marker lines become lifecycle
/// signals; everything else is program output. Interactive shells write
/// their prompt before the marker on the same line, so markers are
/// matched anywhere in the line, not only at its start.
fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim_end_matches('\r');
    if let Some(idx) = trimmed.find(DONE_MARKER) {
        let status = trimmed[idx + DONE_MARKER.len()..].trim().parse().unwrap_or(-1);
        return LineKind::Done { status };
    }
    if trimmed.contains(READY_MARKER) {
        return LineKind::Ready;
    }
    LineKind::Output(trimmed.to_string())
}

fn signal_for(kind: LineKind) -> ExecSignal {
    match kind {
        LineKind::Ready => ExecSignal::Ready,
        LineKind::Done { status: 0 } => ExecSignal::Finished,
        // 128 + SIGINT: the running command was interrupted
        LineKind::Done { status: 130 } => ExecSignal::Failure {
            message: "interrupted".into(),
            interrupted: true,
        },
        LineKind::Done { status } => ExecSignal::Failure {
            message: format!("exited with status {status}"),
            interrupted: false,
        },
        LineKind::Output(text) => ExecSignal::Stdout(text),
    }
}

// =============================================================================
// PTY PROCESS
// =============================================================================

struct PtyProcess {
    /// Keeps the PTY controller side open while the child runs.
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    /// Tells the reader thread an exit is deliberate, not a crash.
    shutdown: Arc<AtomicBool>,
}

impl PtyProcess {
    fn spawn(shell: &str, events: Sender<CoreEvent>) -> Result<Self, CoreError> {
        let pty_system = NativePtySystem::default();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CoreError::BackendError(e.to_string()))?;

        let mut cmd = CommandBuilder::new(shell);
        // Quieter transcript; marker matching tolerates prompts anyway
        cmd.env("PS1", "");
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| CoreError::BackendError(e.to_string()))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CoreError::BackendError(e.to_string()))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| CoreError::BackendError(e.to_string()))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        spawn_reader(reader, events, shutdown.clone());

        // Suppress input echo so submitted code does not come back as
        // output, then announce readiness through the marker protocol.
        writer.write_all(format!("stty -echo\necho {READY_MARKER}\n").as_bytes())?;
        writer.flush()?;

        info!("spawned {} in a pty", shell);
        Ok(Self {
            _master: pair.master,
            child,
            writer,
            shutdown,
        })
    }

    fn write(&mut self, data: &[u8]) -> Result<(), CoreError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn kill(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Err(err) = self.child.kill() {
            warn!("failed to kill pty child: {err}");
        }
        let _ = self.child.wait();
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Read PTY bytes on a background thread and forward complete lines as
/// signals. An unexpected EOF reports `ConnectionLost`.
fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    events: Sender<CoreEvent>,
    shutdown: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        let mut pending = String::new();
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            pending.push_str(&String::from_utf8_lossy(&buf[..n]));
            while let Some(idx) = pending.find('\n') {
                let line: String = pending.drain(..=idx).collect();
                let signal = signal_for(classify_line(line.trim_end_matches('\n')));
                if events.send(CoreEvent::Exec(signal)).is_err() {
                    return;
                }
            }
        }
        if !shutdown.load(Ordering::Relaxed) {
            let _ = events.send(CoreEvent::Exec(ExecSignal::ConnectionLost));
        }
    });
}

// =============================================================================
// BACKEND
// =============================================================================

/// Shell-in-a-PTY implementation of the execution backend.
pub struct PtyRepl {
    shell: String,
    process: Option<PtyProcess>,
    events: Option<Sender<CoreEvent>>,
}

impl PtyRepl {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            process: None,
            events: None,
        }
    }
}

impl ExecutionBackend for PtyRepl {
    fn start(&mut self, events: Sender<CoreEvent>) -> Result<(), CoreError> {
        if self.process.is_some() {
            return Ok(());
        }
        self.process = Some(PtyProcess::spawn(&self.shell, events.clone())?);
        self.events = Some(events);
        Ok(())
    }

    fn submit(&mut self, code: &str) -> Result<(), CoreError> {
        let process = self.process.as_mut().ok_or(CoreError::Disconnected)?;
        let mut payload = String::from(code);
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        payload.push_str(&format!("echo {DONE_MARKER} $?\n"));
        process.write(payload.as_bytes())
    }

    fn interrupt(&mut self) {
        if let Some(process) = &mut self.process {
            // ETX, the terminal's interrupt character
            let _ = process.write(&[0x03]);
        }
    }

    fn restart(&mut self) -> Result<(), CoreError> {
        let events = self.events.clone().ok_or(CoreError::Disconnected)?;
        if let Some(mut old) = self.process.take() {
            old.kill();
        }
        self.process = Some(PtyProcess::spawn(&self.shell, events)?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        self.events = None;
    }
}

// =============================================================================
// TESTS
// =============================================================================
