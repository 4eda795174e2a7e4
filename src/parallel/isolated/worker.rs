//! The loop that runs inside an execution context.
//!
//! A worker receives its first slice of up to B targets, evaluates them and
//! reports one result per target. Each slice position is a "slot": for every
//! result the coordinator replies on that slot with the next unclaimed target
//! or with a stop. Because up to B results are in flight at once, the worker
//! rarely waits on the coordinator. The loop ends when every slot has been
//! stopped, the channel closes, or termination is requested.

use std::io::{BufRead, Write};

use super::protocol::{ErrorInfo, FromWorker, ToWorker};
use crate::error::DispatchError;
use crate::lint::{EvaluationJob, Target};

/// The worker's side of a context's message channel.
pub trait WorkerTransport {
    /// Next message from the coordinator, `None` once the channel is closed.
    fn recv(&mut self) -> Result<Option<ToWorker>, DispatchError>;

    fn send(&mut self, message: FromWorker) -> Result<(), DispatchError>;

    /// True once the coordinator asked this worker to stop.
    fn is_terminated(&self) -> bool {
        false
    }
}

/// Run the worker protocol until the coordinator stops every slot.
///
/// Returns the number of evaluated targets. An evaluation failure is reported
/// to the coordinator as an `Error` message and then returned.
pub fn run_worker<T: WorkerTransport>(
    transport: &mut T,
    job: EvaluationJob,
) -> Result<usize, DispatchError> {
    let (options, files) = match transport.recv()? {
        Some(ToWorker::Initial { options, files }) => (options, files),
        Some(other) => {
            return Err(DispatchError::Protocol(format!(
                "expected an initial message, got {other:?}"
            )));
        }
        None => return Ok(0),
    };
    let job = job.with_policy(options.on_evaluation_error);
    tracing::debug!(files = files.len(), "worker started");

    let mut evaluated = 0;
    for (sender_id, target) in files.iter().enumerate() {
        if transport.is_terminated() {
            return Ok(evaluated);
        }
        evaluate(transport, &job, sender_id, target)?;
        evaluated += 1;
    }

    let mut active = files.len();
    while active > 0 && !transport.is_terminated() {
        match transport.recv()? {
            Some(ToWorker::Next {
                sender_id,
                file: Some(target),
            }) => {
                evaluate(transport, &job, sender_id, &target)?;
                evaluated += 1;
            }
            Some(ToWorker::Next { file: None, .. }) => active -= 1,
            Some(ToWorker::Initial { .. }) => {
                return Err(DispatchError::Protocol(
                    "received a second initial message".into(),
                ));
            }
            None => break,
        }
    }

    tracing::debug!(evaluated, "worker finished");
    Ok(evaluated)
}

fn evaluate<T: WorkerTransport>(
    transport: &mut T,
    job: &EvaluationJob,
    sender_id: usize,
    target: &Target,
) -> Result<(), DispatchError> {
    match job.run(target) {
        Ok(payload) => transport.send(FromWorker::Result { sender_id, payload }),
        Err(error) => {
            transport.send(FromWorker::Error {
                info: ErrorInfo::from(&error),
            })?;
            Err(error)
        }
    }
}

/// Newline-delimited JSON over a reader/writer pair (a child's stdin/stdout).
pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
    line: String,
}

impl<R: BufRead, W: Write> StdioTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
        }
    }
}

impl<R: BufRead, W: Write> WorkerTransport for StdioTransport<R, W> {
    fn recv(&mut self) -> Result<Option<ToWorker>, DispatchError> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .map_err(|e| DispatchError::Protocol(format!("failed to read message: {e}")))?;
            if read == 0 {
                return Ok(None);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map(Some)
                .map_err(|e| DispatchError::Protocol(format!("malformed message: {e}")));
        }
    }

    fn send(&mut self, message: FromWorker) -> Result<(), DispatchError> {
        let write = |writer: &mut W| -> std::io::Result<()> {
            serde_json::to_writer(&mut *writer, &message)?;
            writer.write_all(b"\n")?;
            writer.flush()
        };
        write(&mut self.writer)
            .map_err(|e| DispatchError::Protocol(format!("failed to write message: {e}")))
    }
}

/// Serve the worker protocol on this process's stdin/stdout.
pub fn serve_stdio(job: EvaluationJob) -> Result<usize, DispatchError> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut transport = StdioTransport::new(stdin.lock(), stdout.lock());
    run_worker(&mut transport, job)
}
