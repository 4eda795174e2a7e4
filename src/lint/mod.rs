//! The lint domain: what gets dispatched and what comes back.
//!
//! Dispatchers never look inside these types beyond the target path; the
//! evaluator and the source reader are injected collaborators.

pub mod evaluator;
pub mod rules;
pub mod targets;
pub mod types;

pub use evaluator::{ErrorPolicy, EvaluationJob, Evaluator, FsReader, SourceReader};
pub use rules::{ForbiddenPattern, RuleOptions, TextRules};
pub use targets::TargetCollector;
pub use types::{Diagnostic, DiagnosticResult, LintConfig, Severity, Target};
