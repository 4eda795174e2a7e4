//! Push/pull bridge between a producer and one consumer.
//!
//! ```text
//!             push()                      pull() / collect_all()
//! producer ──────────▶ ┌──────────────┐ ◀──────────────────────── consumer
//!                      │ queued       │
//!  finish / fail ────▶ │ ready notify │ ── on_each_result (every push)
//!                      │ error slot   │ ── on_end (exactly once)
//!  cancel ◀─────────── │ mode         │
//!                      └──────────────┘
//! ```
//!
//! The consumption mode is fixed on first use: `Unconsumed → Iterating` via
//! [`ResultStream::pull`], or `Unconsumed → Collecting` via
//! [`ResultStream::collect_all`]. Mixing the two is a [`UsageError`].
//!
//! Results stay queued until a pull returns them. Waiting pulls are only
//! woken, so dropping a pending [`ResultStream::pull`] never loses a result.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;

use futures::{FutureExt, Stream};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{DispatchError, UsageError, panic_message};

type Pulled<R> = Result<Option<R>, DispatchError>;

/// Called synchronously for every pushed result, whether or not anyone is pulling.
pub type ResultHook<R> = Box<dyn Fn(&R) + Send + Sync>;

/// Called exactly once when production stops for any reason.
pub type EndHook = Box<dyn FnOnce() + Send>;

/// Bookkeeping hooks attached to a stream.
pub struct StreamHooks<R> {
    on_each_result: Option<ResultHook<R>>,
    on_end: Option<EndHook>,
}

impl<R> Default for StreamHooks<R> {
    fn default() -> Self {
        Self {
            on_each_result: None,
            on_end: None,
        }
    }
}

impl<R> StreamHooks<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_each_result(mut self, hook: impl Fn(&R) + Send + Sync + 'static) -> Self {
        self.on_each_result = Some(Box::new(hook));
        self
    }

    pub fn on_end(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(hook));
        self
    }
}

/// How the single consumer reads the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeMode {
    Unconsumed,
    Iterating,
    Collecting,
}

struct State<R> {
    queued: VecDeque<R>,
    error: Option<DispatchError>,
    ended: bool,
    mode: ConsumeMode,
    /// `collect_all()` has returned.
    collected: bool,
}

impl<R> State<R> {
    /// What a pull would observe right now, if it would not have to wait.
    fn ready(&mut self) -> Option<Pulled<R>> {
        if let Some(error) = &self.error {
            return Some(Err(error.clone()));
        }
        if let Some(value) = self.queued.pop_front() {
            tracing::trace!("yield result from queue");
            return Some(Ok(Some(value)));
        }
        if self.ended {
            return Some(Ok(None));
        }
        None
    }
}

struct Shared<R> {
    state: Mutex<State<R>>,
    /// Wakes pulls waiting for a result or for the end.
    ready: Notify,
    on_each_result: Option<ResultHook<R>>,
    on_end: Mutex<Option<EndHook>>,
    cancel: CancellationToken,
}

impl<R> Shared<R> {
    fn new(initial: Vec<R>, hooks: StreamHooks<R>) -> Self {
        Self {
            state: Mutex::new(State {
                queued: initial.into(),
                error: None,
                ended: false,
                mode: ConsumeMode::Unconsumed,
                collected: false,
            }),
            ready: Notify::new(),
            on_each_result: hooks.on_each_result,
            on_end: Mutex::new(hooks.on_end),
            cancel: CancellationToken::new(),
        }
    }

    fn push(&self, value: R) {
        if let Some(hook) = &self.on_each_result {
            hook(&value);
        }

        {
            let mut state = self.state.lock();
            if state.ended || state.error.is_some() {
                return;
            }
            tracing::trace!("queue result");
            state.queued.push_back(value);
        }
        self.ready.notify_waiters();
    }

    fn finish(&self) {
        {
            let mut state = self.state.lock();
            if state.ended {
                return;
            }
            state.ended = true;
        }
        self.ready.notify_waiters();
        tracing::debug!("result stream finished");
        self.fire_on_end();
    }

    fn fail(&self, error: DispatchError) {
        {
            let mut state = self.state.lock();
            if state.ended {
                return;
            }
            state.ended = true;
            state.queued.clear();
            state.error = Some(error.clone());
        }
        self.ready.notify_waiters();
        tracing::debug!(error = %error, label = error.as_label(), "result stream failed");
        self.fire_on_end();
    }

    fn cancel(&self) {
        {
            let mut state = self.state.lock();
            state.queued.clear();
            if !state.ended {
                tracing::debug!("result stream cancelled");
                state.ended = true;
            }
        }
        self.ready.notify_waiters();
        self.cancel.cancel();
        self.fire_on_end();
    }

    fn fire_on_end(&self) {
        let hook = self.on_end.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Producer-side handle given to the procedure feeding a [`ResultStream`].
pub struct Pusher<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for Pusher<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R> Pusher<R> {
    /// Hand one result to the stream.
    pub fn push(&self, value: R) {
        self.shared.push(value);
    }

    /// True once the consumer cancelled; no new work should be started.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolves when the consumer cancels.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.shared.cancel.cancelled()
    }
}

/// Results of a dispatch, readable one at a time or all at once.
pub struct ResultStream<R> {
    shared: Arc<Shared<R>>,
}

impl<R: Send + 'static> ResultStream<R> {
    /// Start `producer` on the current Tokio runtime.
    ///
    /// `initial` results are queued before anything is produced and do not
    /// fire `on_each_result`. The stream finishes when the producer returns
    /// `Ok`, and fails with its error (or its panic) otherwise.
    pub fn spawn<F, Fut>(initial: Vec<R>, hooks: StreamHooks<R>, producer: F) -> Self
    where
        F: FnOnce(Pusher<R>) -> Fut,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        let shared = Arc::new(Shared::new(initial, hooks));
        let produce = producer(Pusher {
            shared: Arc::clone(&shared),
        });
        let settle = Arc::clone(&shared);
        tokio::spawn(async move {
            match AssertUnwindSafe(produce).catch_unwind().await {
                Ok(Ok(())) => settle.finish(),
                Ok(Err(error)) => settle.fail(error),
                Err(payload) => settle.fail(DispatchError::Panicked(panic_message(payload.as_ref()))),
            }
        });
        Self { shared }
    }

    /// A stream holding only `initial` that is already finished.
    pub fn finished(initial: Vec<R>, hooks: StreamHooks<R>) -> Self {
        let shared = Arc::new(Shared::new(initial, hooks));
        shared.finish();
        Self { shared }
    }

    /// A stream that has already failed with `error`.
    pub fn failed(error: DispatchError, hooks: StreamHooks<R>) -> Self {
        let shared = Arc::new(Shared::new(Vec::new(), hooks));
        shared.fail(error);
        Self { shared }
    }
}

impl<R> ResultStream<R> {
    /// The next result in push order, or `None` once the stream is finished.
    ///
    /// Suspends only when nothing is queued and production is still running.
    /// A recorded error is sticky: every later call fails with it.
    ///
    /// Cancel-safe: a result is only removed from the queue by the call that
    /// returns it.
    pub async fn pull(&self) -> Result<Option<R>, DispatchError> {
        {
            let mut state = self.shared.state.lock();
            match state.mode {
                ConsumeMode::Unconsumed => state.mode = ConsumeMode::Iterating,
                ConsumeMode::Iterating => {}
                ConsumeMode::Collecting if state.collected => {}
                ConsumeMode::Collecting => return Err(UsageError::PullWhileCollecting.into()),
            }
        }
        self.next_ready().await
    }

    /// Wait for production to finish and return every result in push order.
    ///
    /// Only valid on a stream that was never pulled from.
    pub async fn collect_all(&self) -> Result<Vec<R>, DispatchError> {
        {
            let mut state = self.shared.state.lock();
            match state.mode {
                ConsumeMode::Unconsumed => state.mode = ConsumeMode::Collecting,
                ConsumeMode::Iterating => return Err(UsageError::CollectAfterPull.into()),
                ConsumeMode::Collecting => return Err(UsageError::CollectTwice.into()),
            }
        }

        let mut results = Vec::new();
        let outcome = loop {
            match self.next_ready().await {
                Ok(Some(value)) => results.push(value),
                Ok(None) => break Ok(results),
                Err(error) => break Err(error),
            }
        };
        self.shared.state.lock().collected = true;
        outcome
    }

    async fn next_ready(&self) -> Pulled<R> {
        loop {
            // register before looking, so a push in between still wakes us
            let mut notified = pin!(self.shared.ready.notified());
            notified.as_mut().enable();
            let ready = self.shared.state.lock().ready();
            if let Some(ready) = ready {
                return ready;
            }
            tracing::trace!("wait for result");
            notified.await;
        }
    }

    /// Stop consuming: drop unread results, release pending pulls as
    /// finished and ask the producer to stop starting new work.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn mode(&self) -> ConsumeMode {
        self.shared.state.lock().mode
    }

    /// True once production stopped (finished, failed or cancelled).
    pub fn is_ended(&self) -> bool {
        self.shared.state.lock().ended
    }

    /// Adapt into a [`Stream`] of results; ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<R, DispatchError>> {
        futures::stream::unfold(Some(self), |stream| async move {
            let stream = stream?;
            match stream.pull().await {
                Ok(Some(value)) => Some((Ok(value), Some(stream))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}

impl<R> Drop for ResultStream<R> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}
