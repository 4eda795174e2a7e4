use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::context::{ContextEvent, ContextId, ContextKind, ContextSpawner, EventSink, ExecutionContext};
use super::protocol::{FromWorker, ToWorker};
use crate::error::DispatchError;

/// Hidden subcommand that serves the worker protocol on stdin/stdout.
pub const WORKER_SUBCOMMAND: &str = "__worker";

/// Spawns child processes that speak the worker protocol as NDJSON.
///
/// By default the current executable is re-invoked with
/// [`WORKER_SUBCOMMAND`], so the child runs the same evaluator as the CLI.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-invoke the running binary as a worker.
    pub fn current_exe() -> Result<Self, DispatchError> {
        let program = std::env::current_exe().map_err(|e| DispatchError::Spawn {
            context: ContextId(0),
            message: format!("cannot locate the current executable: {e}"),
        })?;
        Ok(Self::new(program, [WORKER_SUBCOMMAND]))
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl ContextSpawner for ProcessSpawner {
    fn kind(&self) -> ContextKind {
        ContextKind::Process
    }

    fn spawn(&self, events: EventSink) -> Result<Box<dyn ExecutionContext>, DispatchError> {
        let id = events.id();
        let spawn_error = |message: String| DispatchError::Spawn {
            context: id,
            message,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(format!("failed to start {}: {e}", self.program.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("child stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("child stdout was not captured".into()))?;
        tracing::debug!(context = %id, pid = ?child.id(), "spawned worker process");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();
        tokio::spawn(write_messages(stdin, outbound_rx, events.clone()));
        tokio::spawn(read_until_exit(child, stdout, kill.clone(), events));

        Ok(Box::new(ProcessContext {
            id,
            outbound: Some(outbound_tx),
            kill,
        }))
    }
}

struct ProcessContext {
    id: ContextId,
    outbound: Option<mpsc::UnboundedSender<ToWorker>>,
    kill: CancellationToken,
}

impl ExecutionContext for ProcessContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Process
    }

    fn send(&mut self, message: ToWorker) -> Result<(), DispatchError> {
        let outbound = self.outbound.as_ref().ok_or_else(|| DispatchError::Context {
            context: self.id,
            message: "context was terminated".into(),
        })?;
        outbound.send(message).map_err(|_| DispatchError::Context {
            context: self.id,
            message: "worker stdin is closed".into(),
        })
    }

    fn terminate(&mut self) {
        self.outbound.take();
        self.kill.cancel();
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn write_messages(
    mut stdin: ChildStdin,
    mut outbound: mpsc::UnboundedReceiver<ToWorker>,
    events: EventSink,
) {
    while let Some(message) = outbound.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                events.emit(ContextEvent::Error(format!("cannot encode message: {e}")));
                return;
            }
        };
        line.push(b'\n');
        let written = match stdin.write_all(&line).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            events.emit(ContextEvent::Error(format!("failed to write to worker: {e}")));
            return;
        }
    }
    // dropping stdin closes the worker's input
}

async fn read_until_exit(
    mut child: Child,
    stdout: ChildStdout,
    kill: CancellationToken,
    events: EventSink,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            _ = kill.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match serde_json::from_str::<FromWorker>(&line) {
                    Ok(message) => events.emit(ContextEvent::Message(message)),
                    Err(e) => {
                        events.emit(ContextEvent::Error(format!("malformed message from worker: {e}")));
                        break;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    events.emit(ContextEvent::Error(format!("failed to read from worker: {e}")));
                    break;
                }
            },
        }
    }

    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(context = %events.id(), "kill failed: {e}");
            }
            child.wait().await
        }
    };
    match status {
        Ok(status) => {
            tracing::debug!(context = %events.id(), %status, "worker process exited");
            events.emit(ContextEvent::Exit(status.code()));
        }
        Err(e) => {
            events.emit(ContextEvent::Error(format!("failed to wait for worker: {e}")));
            events.emit(ContextEvent::Exit(None));
        }
    }
}
