use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{Receiver, Sender, unbounded};

use super::context::{ContextEvent, ContextId, ContextKind, ContextSpawner, EventSink, ExecutionContext};
use super::protocol::{FromWorker, ToWorker};
use super::worker::{WorkerTransport, run_worker};
use crate::error::{DispatchError, panic_message};
use crate::lint::EvaluationJob;

/// Spawns OS threads that share the coordinator's evaluator.
pub struct ThreadSpawner {
    job: EvaluationJob,
}

impl ThreadSpawner {
    pub fn new(job: EvaluationJob) -> Self {
        Self { job }
    }
}

impl ContextSpawner for ThreadSpawner {
    fn kind(&self) -> ContextKind {
        ContextKind::Thread
    }

    fn spawn(&self, events: EventSink) -> Result<Box<dyn ExecutionContext>, DispatchError> {
        let id = events.id();
        let (inbox_tx, inbox_rx) = unbounded();
        let terminated = Arc::new(AtomicBool::new(false));
        let mut transport = ChannelTransport {
            inbox: inbox_rx,
            events: events.clone(),
            terminated: Arc::clone(&terminated),
        };
        let job = self.job.clone();

        std::thread::Builder::new()
            .name(format!("batchlint-worker-{}", id.0))
            .spawn(move || {
                let outcome =
                    std::panic::catch_unwind(AssertUnwindSafe(|| run_worker(&mut transport, job)));
                let code = match outcome {
                    Ok(Ok(evaluated)) => {
                        tracing::trace!(context = %id, evaluated, "worker thread done");
                        0
                    }
                    // already reported through the protocol
                    Ok(Err(error)) if error.is_evaluation_error() => 1,
                    Ok(Err(error)) => {
                        events.emit(ContextEvent::Error(error.to_string()));
                        1
                    }
                    Err(payload) => {
                        events.emit(ContextEvent::Error(format!(
                            "worker panicked: {}",
                            panic_message(payload.as_ref())
                        )));
                        1
                    }
                };
                events.emit(ContextEvent::Exit(Some(code)));
            })
            .map_err(|e| DispatchError::Spawn {
                context: id,
                message: e.to_string(),
            })?;

        tracing::debug!(context = %id, "spawned worker thread");
        Ok(Box::new(ThreadContext {
            id,
            inbox: Some(inbox_tx),
            terminated,
        }))
    }
}

/// Coordinator-side handle of a worker thread.
struct ThreadContext {
    id: ContextId,
    inbox: Option<Sender<ToWorker>>,
    terminated: Arc<AtomicBool>,
}

impl ExecutionContext for ThreadContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn kind(&self) -> ContextKind {
        ContextKind::Thread
    }

    fn send(&mut self, message: ToWorker) -> Result<(), DispatchError> {
        let inbox = self.inbox.as_ref().ok_or_else(|| DispatchError::Context {
            context: self.id,
            message: "context was terminated".into(),
        })?;
        inbox.send(message).map_err(|_| DispatchError::Context {
            context: self.id,
            message: "worker thread is gone".into(),
        })
    }

    /// Threads cannot be killed: the worker stops before its next
    /// evaluation, an evaluation already running finishes first.
    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::Release);
        self.inbox.take();
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Worker side: crossbeam inbox in, coordinator event channel out.
struct ChannelTransport {
    inbox: Receiver<ToWorker>,
    events: EventSink,
    terminated: Arc<AtomicBool>,
}

impl WorkerTransport for ChannelTransport {
    fn recv(&mut self) -> Result<Option<ToWorker>, DispatchError> {
        if self.is_terminated() {
            return Ok(None);
        }
        Ok(self.inbox.recv().ok())
    }

    fn send(&mut self, message: FromWorker) -> Result<(), DispatchError> {
        self.events.emit(ContextEvent::Message(message));
        Ok(())
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lint::{DiagnosticResult, ErrorPolicy, FsReader, LintConfig, Target};
    use crate::parallel::isolated::protocol::WorkerOptions;
    use std::path::Path;
    use tokio::sync::mpsc;

    fn spawner() -> ThreadSpawner {
        let evaluator = |_: &LintConfig, path: &Path, _: &str| -> anyhow::Result<DiagnosticResult> {
            if path.ends_with("panic.js") {
                panic!("evaluator exploded");
            }
            Ok(DiagnosticResult::clean(path))
        };
        ThreadSpawner::new(EvaluationJob::new(
            Arc::new(evaluator),
            Arc::new(FsReader),
            ErrorPolicy::Abort,
        ))
    }

    fn initial(paths: &[&Path]) -> ToWorker {
        ToWorker::Initial {
            options: WorkerOptions {
                on_evaluation_error: ErrorPolicy::Abort,
            },
            files: paths
                .iter()
                .map(|p| Target::new(*p, Arc::new(LintConfig::default())))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_thread_context_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.js");
        std::fs::write(&file, "x").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut context = spawner().spawn(EventSink::new(ContextId(0), tx)).unwrap();
        assert_eq!(context.kind(), ContextKind::Thread);
        context.send(initial(&[&file])).unwrap();

        let (id, event) = rx.recv().await.unwrap();
        assert_eq!(id, ContextId(0));
        assert!(matches!(
            event,
            ContextEvent::Message(FromWorker::Result { sender_id: 0, .. })
        ));

        context
            .send(ToWorker::Next {
                sender_id: 0,
                file: None,
            })
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().1, ContextEvent::Exit(Some(0)));
    }

    #[tokio::test]
    async fn test_panic_becomes_error_then_exit() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("panic.js");
        std::fs::write(&file, "x").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut context = spawner().spawn(EventSink::new(ContextId(1), tx)).unwrap();
        context.send(initial(&[&file])).unwrap();

        match rx.recv().await.unwrap().1 {
            ContextEvent::Error(message) => assert!(message.contains("evaluator exploded")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap().1, ContextEvent::Exit(Some(1)));
    }

    #[tokio::test]
    async fn test_terminate_stops_idle_worker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut context = spawner().spawn(EventSink::new(ContextId(2), tx)).unwrap();
        context.terminate();
        context.terminate();
        assert_eq!(rx.recv().await.unwrap().1, ContextEvent::Exit(Some(0)));
        assert!(context.send(initial(&[])).is_err());
    }
}
