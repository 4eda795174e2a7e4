//! Messages exchanged between the coordinator and a worker context.
//!
//! Internal and not stable. Thread-backed contexts pass these values over
//! channels; process-backed contexts write them as one JSON document per line.
//!
//! ```text
//! coordinator                              worker
//!     │ ── Initial { options, files[..B] } ──▶ │
//!     │ ◀── Result { sender_id, payload } ──── │  (one per evaluated file)
//!     │ ── Next { sender_id, file | null } ──▶ │
//!     │ ◀── Error { info } ─────────────────── │  (evaluation failed)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::lint::{DiagnosticResult, ErrorPolicy, Target};

/// Settings shipped to every worker in its startup payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerOptions {
    pub on_evaluation_error: ErrorPolicy,
}

/// Coordinator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToWorker {
    /// Startup payload: the worker's first slice of targets.
    Initial {
        options: WorkerOptions,
        files: Vec<Target>,
    },
    /// Reply to a result: the next target for that slot, or `None` to stop it.
    #[serde(rename_all = "camelCase")]
    Next {
        sender_id: usize,
        file: Option<Target>,
    },
}

/// Worker to coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FromWorker {
    #[serde(rename_all = "camelCase")]
    Result {
        sender_id: usize,
        payload: DiagnosticResult,
    },
    Error { info: ErrorInfo },
}

/// Serializable form of a failure inside a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ErrorInfo {
    Evaluation { path: std::path::PathBuf, message: String },
    Read { path: std::path::PathBuf, message: String },
    Other { message: String },
}

impl From<&DispatchError> for ErrorInfo {
    fn from(error: &DispatchError) -> Self {
        match error {
            DispatchError::Evaluation { path, message } => ErrorInfo::Evaluation {
                path: path.clone(),
                message: message.clone(),
            },
            DispatchError::Read { path, message } => ErrorInfo::Read {
                path: path.clone(),
                message: message.clone(),
            },
            other => ErrorInfo::Other {
                message: other.to_string(),
            },
        }
    }
}

impl ErrorInfo {
    /// Rebuild the dispatch error on the coordinator side.
    pub fn into_error(self, context: super::ContextId) -> DispatchError {
        match self {
            ErrorInfo::Evaluation { path, message } => DispatchError::Evaluation { path, message },
            ErrorInfo::Read { path, message } => DispatchError::Read { path, message },
            ErrorInfo::Other { message } => DispatchError::Context { context, message },
        }
    }
}
