//! # batchlint - batch static analysis with a parallel dispatch engine
//!
//! batchlint applies a diagnostic [`Evaluator`](lint::Evaluator) to many
//! files and streams one [`DiagnosticResult`](lint::DiagnosticResult) per
//! file back to the caller.
//!
//! ## Features
//!
//! - **One consumption API**: results arrive through a
//!   [`ResultStream`](parallel::ResultStream) that can be pulled one at a
//!   time or collected in bulk, whatever strategy produced them
//! - **Cooperative or isolated**: in-process tasks, OS threads, or child
//!   processes speaking a small NDJSON protocol
//! - **Fail fast**: the first failure stops new work and terminates every
//!   execution context
//! - **Layered configuration** through figment
//!
//! ## Quick Start
//!
//! ```bash
//! # Lint the current directory with an estimated worker count
//! batchlint
//!
//! # Four worker processes, JSON output
//! batchlint src --concurrency 4 --strategy processes --format json
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod lint;
pub mod parallel;

pub use cli::{Cli, Output};
pub use config::Settings;
pub use error::{DispatchError, UsageError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
