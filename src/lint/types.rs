use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Resolved configuration for one target, opaque to the dispatchers.
///
/// The value travels unchanged to the evaluator, including across process
/// boundaries, so it is kept as plain JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LintConfig(serde_json::Value);

impl LintConfig {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Deserialize the config into an evaluator-specific options type.
    pub fn extract<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        if self.0.is_null() {
            return Ok(serde_json::from_value(serde_json::json!({}))?);
        }
        Ok(serde_json::from_value(self.0.clone())?)
    }
}

/// One dispatchable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub path: PathBuf,
    pub config: Arc<LintConfig>,
}

impl Target {
    pub fn new(path: impl Into<PathBuf>, config: Arc<LintConfig>) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }
}

/// Severity of a single diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single message produced by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub rule_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub column: usize,
    /// Set when the file could not be evaluated at all.
    #[serde(default)]
    pub fatal: bool,
}

impl Diagnostic {
    pub fn new(
        rule_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            rule_id: Some(rule_id.into()),
            severity,
            message: message.into(),
            line,
            column,
            fatal: false,
        }
    }
}

/// Output of evaluating one target, keyed by its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticResult {
    pub file_path: PathBuf,
    pub messages: Vec<Diagnostic>,
    pub error_count: usize,
    pub warning_count: usize,
    pub fatal_error_count: usize,
}

impl DiagnosticResult {
    /// Build a result and derive the counters from the messages.
    pub fn new(file_path: impl Into<PathBuf>, messages: Vec<Diagnostic>) -> Self {
        let error_count = messages
            .iter()
            .filter(|m| m.severity == Severity::Error)
            .count();
        let fatal_error_count = messages.iter().filter(|m| m.fatal).count();
        let warning_count = messages.len() - error_count;
        Self {
            file_path: file_path.into(),
            messages,
            error_count,
            warning_count,
            fatal_error_count,
        }
    }

    /// A clean result with no messages.
    pub fn clean(file_path: impl Into<PathBuf>) -> Self {
        Self::new(file_path, Vec::new())
    }

    /// A result flagging that the file itself failed to evaluate.
    pub fn from_failure(file_path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        let message = Diagnostic {
            rule_id: None,
            severity: Severity::Error,
            message: message.into(),
            line: 0,
            column: 0,
            fatal: true,
        };
        Self::new(file_path, vec![message])
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// Orders results by file path; used to make collected output deterministic.
    pub fn compare_by_file_path(a: &Self, b: &Self) -> Ordering {
        a.file_path.cmp(&b.file_path)
    }

    /// Keep only error-severity messages, dropping results left without any.
    pub fn errors_only(results: &[DiagnosticResult]) -> Vec<DiagnosticResult> {
        results
            .iter()
            .filter_map(|result| {
                let messages: Vec<Diagnostic> = result
                    .messages
                    .iter()
                    .filter(|m| m.severity == Severity::Error)
                    .cloned()
                    .collect();
                if messages.is_empty() {
                    None
                } else {
                    Some(DiagnosticResult::new(result.file_path.clone(), messages))
                }
            })
            .collect()
    }
}
