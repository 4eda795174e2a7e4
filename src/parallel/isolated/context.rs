use std::fmt;

use tokio::sync::mpsc;

use super::protocol::{FromWorker, ToWorker};
use crate::error::DispatchError;

/// Identifies one execution context within a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub usize);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What backs an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Thread,
    Process,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Thread => "thread",
            ContextKind::Process => "process",
        }
    }
}

/// Lifecycle of a context as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Spawned, startup payload not delivered yet.
    Starting,
    /// Alive with no claimed targets outstanding.
    Ready,
    /// Alive and evaluating claimed targets.
    Busy,
    /// Asked to stop; waiting for its exit.
    Terminating,
    Dead,
}

/// Something that happened inside a context.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    Message(FromWorker),
    /// The context failed outside the message protocol (crash, I/O error).
    Error(String),
    /// The context is gone. `None` when it was killed by a signal.
    Exit(Option<i32>),
}

/// Where a context reports its events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    id: ContextId,
    tx: mpsc::UnboundedSender<(ContextId, ContextEvent)>,
}

impl EventSink {
    pub(crate) fn new(id: ContextId, tx: mpsc::UnboundedSender<(ContextId, ContextEvent)>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Report an event; silently dropped once the coordinator is gone.
    pub fn emit(&self, event: ContextEvent) {
        let _ = self.tx.send((self.id, event));
    }
}

/// Uniform handle over a thread- or process-backed worker.
pub trait ExecutionContext: Send {
    fn id(&self) -> ContextId;

    fn kind(&self) -> ContextKind;

    /// Deliver a message to the worker.
    fn send(&mut self, message: ToWorker) -> Result<(), DispatchError>;

    /// Ask the worker to stop as soon as possible. The context still reports
    /// [`ContextEvent::Exit`] once it is gone. Calling it twice is harmless.
    fn terminate(&mut self);
}

/// Creates execution contexts for the isolated dispatcher.
pub trait ContextSpawner: Send + Sync {
    fn kind(&self) -> ContextKind;

    fn spawn(&self, events: EventSink) -> Result<Box<dyn ExecutionContext>, DispatchError>;
}
