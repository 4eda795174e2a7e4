//! Error types surfaced by a dispatch.
//!
//! - [`DispatchError`] is the terminal error stored in a
//!   [`ResultStream`](crate::parallel::ResultStream). It is `Clone` because
//!   every pending and future `pull()` observes the same value.
//! - [`UsageError`] covers misuse of the consumption API or the coordinator.

use std::path::PathBuf;

use thiserror::Error;

use crate::parallel::ContextId;

/// Misuse of a [`ResultStream`](crate::parallel::ResultStream) or
/// [`Coordinator`](crate::parallel::Coordinator). Never retried.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    /// `pull()` was called while `collect_all()` is still collecting.
    #[error("pull() cannot be used while collect_all() is collecting this stream")]
    PullWhileCollecting,

    /// `collect_all()` was called after the stream was pulled from.
    #[error("collect_all() cannot be used after pull() was called on this stream")]
    CollectAfterPull,

    /// `collect_all()` was called a second time.
    #[error("collect_all() was already called on this stream")]
    CollectTwice,

    /// A second dispatch was started before the previous one finished.
    #[error("another dispatch is still in flight on this coordinator")]
    DispatchInFlight,
}

impl UsageError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            UsageError::PullWhileCollecting => "usage_pull_while_collecting",
            UsageError::CollectAfterPull => "usage_collect_after_pull",
            UsageError::CollectTwice => "usage_collect_twice",
            UsageError::DispatchInFlight => "usage_dispatch_in_flight",
        }
    }
}

/// Terminal error of a dispatch.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The evaluator failed for one target.
    #[error("failed to evaluate {}: {message}", path.display())]
    Evaluation { path: PathBuf, message: String },

    /// The source of one target could not be read.
    #[error("failed to read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    /// An execution context reported an error or crashed.
    #[error("execution context {context} failed: {message}")]
    Context { context: ContextId, message: String },

    /// An execution context exited abnormally.
    #[error("execution context {context} stopped with exit code {code}")]
    ContextExit { context: ContextId, code: i32 },

    /// An execution context could not be started.
    #[error("failed to spawn execution context {context}: {message}")]
    Spawn { context: ContextId, message: String },

    /// An unexpected message crossed a context boundary.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The producer panicked.
    #[error("dispatch panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Evaluation { .. } => "dispatch_evaluation",
            DispatchError::Read { .. } => "dispatch_read",
            DispatchError::Context { .. } => "dispatch_context",
            DispatchError::ContextExit { .. } => "dispatch_context_exit",
            DispatchError::Spawn { .. } => "dispatch_spawn",
            DispatchError::Protocol(_) => "dispatch_protocol",
            DispatchError::Panicked(_) => "dispatch_panicked",
            DispatchError::Usage(usage) => usage.as_label(),
        }
    }

    /// True for per-file failures (read or evaluation).
    pub fn is_evaluation_error(&self) -> bool {
        matches!(
            self,
            DispatchError::Evaluation { .. } | DispatchError::Read { .. }
        )
    }

    /// True for worker crashes, abnormal exits and spawn failures.
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            DispatchError::Context { .. }
                | DispatchError::ContextExit { .. }
                | DispatchError::Spawn { .. }
        )
    }

    /// True for misuse of the API.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, DispatchError::Usage(_))
    }

    /// The target path, for per-file failures.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            DispatchError::Evaluation { path, .. } | DispatchError::Read { path, .. } => {
                Some(path)
            }
            _ => None,
        }
    }
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
