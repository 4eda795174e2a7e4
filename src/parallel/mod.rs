//! Dispatch engine
//!
//! Fans a list of targets out over concurrent workers and hands the results
//! back through one [`ResultStream`], whichever way the work was executed.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   plan   ┌──────────────────────┐   push   ┌──────────────┐
//! │ Coordinator   │────────▶│ InProcessDispatcher  │────────▶│              │
//! │               │         │  (cooperative tasks) │         │ ResultStream │──▶ pull()
//! │ • estimate()  │         ├──────────────────────┤         │              │──▶ collect_all()
//! │ • strategy    │────────▶│ IsolatedDispatcher   │────────▶│              │
//! │ • one at once │         │  (threads/processes) │         └──────────────┘
//! └───────────────┘         └──────────────────────┘
//!                                    │ claim
//!                                    ▼
//!                               ┌──────────┐
//!                               │  Cursor  │  each target handed out once
//!                               └──────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use batchlint::config::Concurrency;
//! use batchlint::lint::{LintConfig, Target, TextRules};
//! use batchlint::parallel::{Coordinator, StreamHooks};
//!
//! # async fn run() -> Result<(), batchlint::DispatchError> {
//! let coordinator = Coordinator::new(Arc::new(TextRules::new()));
//! let config = Arc::new(LintConfig::default());
//! let targets = vec![Target::new("src/a.js", config)];
//!
//! let stream = coordinator.dispatch(targets, Concurrency::Auto, StreamHooks::new());
//! while let Some(result) = stream.pull().await? {
//!     println!("{}: {} errors", result.file_path.display(), result.error_count);
//! }
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod cursor;
mod estimator;
mod in_process;
pub mod isolated;
mod stream;

pub use coordinator::{Coordinator, Plan};
pub use cursor::Cursor;
pub use estimator::{Capabilities, FILES_PER_PROCESS, FILES_PER_THREAD, estimate, host_parallelism};
pub use in_process::InProcessDispatcher;
pub use isolated::{
    ContextEvent, ContextId, ContextKind, ContextSpawner, ContextState, EventSink, ExecutionContext,
    IsolatedDispatcher, ProcessSpawner, ThreadSpawner,
};
pub use stream::{ConsumeMode, EndHook, Pusher, ResultHook, ResultStream, StreamHooks};
