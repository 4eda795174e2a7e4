//! Dispatch across isolated execution contexts.
//!
//! Each context (a thread or a child process) starts with a slice of up to
//! `chunk_size` targets. After that, every result it reports is answered with
//! the next unclaimed target for the same slot, so the cursor stays the only
//! place where work is handed out and faster contexts simply claim more.
//!
//! The first failure (evaluation error, crash, non-zero exit) exhausts the
//! cursor and terminates every context. Once all contexts have exited, that
//! failure becomes the outcome of the dispatch.

mod context;
mod process;
mod protocol;
mod thread;
mod worker;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::cursor::Cursor;
use super::stream::Pusher;
use crate::error::DispatchError;
use crate::lint::DiagnosticResult;

pub use context::{
    ContextEvent, ContextId, ContextKind, ContextSpawner, ContextState, EventSink, ExecutionContext,
};
pub use process::{ProcessSpawner, WORKER_SUBCOMMAND};
pub use protocol::{ErrorInfo, FromWorker, ToWorker, WorkerOptions};
pub use thread::ThreadSpawner;
pub use worker::{StdioTransport, WorkerTransport, run_worker, serve_stdio};

pub struct IsolatedDispatcher {
    spawner: Arc<dyn ContextSpawner>,
    contexts: usize,
    chunk_size: usize,
    options: WorkerOptions,
}

impl IsolatedDispatcher {
    pub fn new(
        spawner: Arc<dyn ContextSpawner>,
        contexts: usize,
        chunk_size: usize,
        options: WorkerOptions,
    ) -> Self {
        Self {
            spawner,
            contexts: contexts.max(1),
            chunk_size: chunk_size.max(1),
            options,
        }
    }

    pub fn contexts(&self) -> usize {
        self.contexts
    }

    /// Evaluate every target reachable through `cursor` in up to
    /// `contexts` execution contexts, pushing each result as it arrives.
    pub async fn run(
        &self,
        cursor: Arc<Cursor>,
        push: Pusher<DiagnosticResult>,
    ) -> Result<(), DispatchError> {
        tracing::debug!(
            files = cursor.len(),
            contexts = self.contexts,
            kind = self.spawner.kind().as_str(),
            "verify files in isolated contexts"
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut run = Run {
            cursor: &cursor,
            push: &push,
            slots: BTreeMap::new(),
            failure: None,
            stopping: false,
        };

        for index in 0..self.contexts {
            if cursor.is_exhausted() || push.is_cancelled() {
                break;
            }
            let id = ContextId(index);
            let context = match self.spawner.spawn(EventSink::new(id, tx.clone())) {
                Ok(context) => context,
                Err(error) => {
                    run.fail(error);
                    break;
                }
            };
            let files = cursor.claim_chunk(self.chunk_size).to_vec();
            let mut slot = Slot {
                context,
                state: ContextState::Starting,
                outstanding: files.len(),
            };
            let sent = slot.context.send(ToWorker::Initial {
                options: self.options,
                files,
            });
            slot.state = ContextState::Busy;
            run.slots.insert(id, slot);
            if let Err(error) = sent {
                run.fail(error);
                break;
            }
        }
        drop(tx);
        tracing::debug!(started = run.slots.len(), "execution contexts started");

        let mut cancelled = false;
        while !run.slots.is_empty() {
            let event = tokio::select! {
                _ = push.cancelled(), if !cancelled => {
                    cancelled = true;
                    tracing::debug!("dispatch cancelled");
                    run.stop_all();
                    continue;
                }
                event = rx.recv() => event,
            };
            let Some((id, event)) = event else {
                run.vanished();
                break;
            };
            run.handle(id, event);
        }

        match run.failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct Slot {
    context: Box<dyn ExecutionContext>,
    state: ContextState,
    /// Targets handed to this context without a result yet.
    outstanding: usize,
}

impl Slot {
    fn terminate(&mut self) {
        if matches!(self.state, ContextState::Terminating | ContextState::Dead) {
            return;
        }
        self.state = ContextState::Terminating;
        self.context.terminate();
    }
}

struct Run<'a> {
    cursor: &'a Cursor,
    push: &'a Pusher<DiagnosticResult>,
    slots: BTreeMap<ContextId, Slot>,
    failure: Option<DispatchError>,
    /// Failed or cancelled: no more replies, no more results.
    stopping: bool,
}

impl Run<'_> {
    fn handle(&mut self, id: ContextId, event: ContextEvent) {
        match event {
            ContextEvent::Message(FromWorker::Result { sender_id, payload }) => {
                self.on_result(id, sender_id, payload);
            }
            ContextEvent::Message(FromWorker::Error { info }) => {
                self.fail(info.into_error(id));
            }
            ContextEvent::Error(message) => {
                let terminating = self
                    .slots
                    .get(&id)
                    .is_none_or(|slot| slot.state == ContextState::Terminating);
                if terminating {
                    tracing::debug!(context = %id, "ignore error from stopping context: {message}");
                } else {
                    self.fail(DispatchError::Context {
                        context: id,
                        message,
                    });
                }
            }
            ContextEvent::Exit(code) => self.on_exit(id, code),
        }
    }

    fn on_result(&mut self, id: ContextId, sender_id: usize, payload: DiagnosticResult) {
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        slot.outstanding = slot.outstanding.saturating_sub(1);
        if self.stopping || slot.state == ContextState::Terminating {
            return;
        }

        let next = self.cursor.claim().cloned();
        if next.is_some() {
            slot.outstanding += 1;
        }
        if let Err(error) = slot.context.send(ToWorker::Next {
            sender_id,
            file: next,
        }) {
            self.fail(error);
            return;
        }
        slot.state = if slot.outstanding > 0 {
            ContextState::Busy
        } else {
            ContextState::Ready
        };
        self.push.push(payload);
    }

    fn on_exit(&mut self, id: ContextId, code: Option<i32>) {
        let Some(mut slot) = self.slots.remove(&id) else {
            return;
        };
        let expected = slot.state == ContextState::Terminating;
        slot.state = ContextState::Dead;
        tracing::debug!(context = %id, ?code, outstanding = slot.outstanding, "context exited");
        if expected || self.stopping {
            return;
        }

        match code {
            Some(0) if slot.outstanding == 0 => {}
            Some(0) => self.fail(DispatchError::Context {
                context: id,
                message: format!("exited with {} claimed files unfinished", slot.outstanding),
            }),
            Some(code) => self.fail(DispatchError::ContextExit { context: id, code }),
            None => self.fail(DispatchError::Context {
                context: id,
                message: "killed by a signal".into(),
            }),
        }
    }

    /// Every event sink is gone but some contexts never reported an exit.
    fn vanished(&mut self) {
        let ids: Vec<ContextId> = self.slots.keys().copied().collect();
        for id in ids {
            let Some(mut slot) = self.slots.remove(&id) else {
                continue;
            };
            tracing::debug!(context = %id, outstanding = slot.outstanding, "context vanished");
            let expected = slot.state == ContextState::Terminating;
            slot.state = ContextState::Dead;
            if expected || self.stopping || slot.outstanding == 0 {
                continue;
            }
            self.fail(DispatchError::Context {
                context: id,
                message: format!("vanished with {} claimed files unfinished", slot.outstanding),
            });
        }
    }

    /// Record the first failure and stop everything. Later failures are
    /// consequences of the first one and only logged.
    fn fail(&mut self, error: DispatchError) {
        if self.failure.is_some() {
            tracing::debug!(error = %error, "ignore follow-up failure");
            return;
        }
        tracing::debug!(error = %error, label = error.as_label(), "dispatch failed");
        self.failure = Some(error);
        self.stop_all();
    }

    fn stop_all(&mut self) {
        self.stopping = true;
        let skipped = self.cursor.exhaust();
        let running = self
            .slots
            .values()
            .filter(|slot| slot.state != ContextState::Terminating)
            .count();
        tracing::debug!(running, skipped, "terminate execution contexts");
        for slot in self.slots.values_mut() {
            slot.terminate();
        }
    }
}
