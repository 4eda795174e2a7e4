//! Built-in line-oriented rules.
//!
//! This is the evaluator the `batchlint` binary ships with, and the one
//! process-backed workers run. Library users normally supply their own
//! [`Evaluator`].

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::evaluator::Evaluator;
use super::types::{Diagnostic, DiagnosticResult, LintConfig, Severity};

/// A regex that must not appear in any line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForbiddenPattern {
    pub name: String,
    pub regex: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Options read from the `[rules]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOptions {
    /// 0 disables the check
    #[serde(default)]
    pub max_line_length: usize,
    #[serde(default)]
    pub no_trailing_spaces: bool,
    #[serde(default)]
    pub no_tabs: bool,
    #[serde(default)]
    pub forbidden: Vec<ForbiddenPattern>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Error
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            max_line_length: 0,
            no_trailing_spaces: false,
            no_tabs: false,
            forbidden: Vec::new(),
            severity: default_severity(),
        }
    }
}

/// Evaluator applying [`RuleOptions`] to each line of a file.
#[derive(Debug, Default)]
pub struct TextRules {
    compiled: Mutex<HashMap<String, Regex>>,
}

impl TextRules {
    pub fn new() -> Self {
        Self::default()
    }

    fn regex(&self, pattern: &str) -> Result<Regex> {
        let mut compiled = self.compiled.lock();
        if let Some(regex) = compiled.get(pattern) {
            return Ok(regex.clone());
        }
        let regex =
            Regex::new(pattern).with_context(|| format!("invalid forbidden pattern '{pattern}'"))?;
        compiled.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

impl Evaluator for TextRules {
    fn evaluate(
        &self,
        config: &LintConfig,
        path: &Path,
        contents: &str,
    ) -> Result<DiagnosticResult> {
        let options: RuleOptions = config
            .extract()
            .context("invalid rule options")?;
        let severity = options.severity;

        let forbidden = options
            .forbidden
            .iter()
            .map(|pattern| Ok((pattern, self.regex(&pattern.regex)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut messages = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line_number = index + 1;

            let length = line.chars().count();
            if options.max_line_length > 0 && length > options.max_line_length {
                messages.push(Diagnostic::new(
                    "max-line-length",
                    severity,
                    format!(
                        "This line has a length of {length}. Maximum allowed is {}.",
                        options.max_line_length
                    ),
                    line_number,
                    options.max_line_length + 1,
                ));
            }

            if options.no_trailing_spaces {
                let trimmed = line.trim_end();
                if trimmed.len() != line.len() {
                    messages.push(Diagnostic::new(
                        "no-trailing-spaces",
                        severity,
                        "Trailing spaces not allowed.",
                        line_number,
                        trimmed.chars().count() + 1,
                    ));
                }
            }

            if options.no_tabs
                && let Some(offset) = line.find('\t')
            {
                messages.push(Diagnostic::new(
                    "no-tabs",
                    severity,
                    "Unexpected tab character.",
                    line_number,
                    line[..offset].chars().count() + 1,
                ));
            }

            for (pattern, regex) in &forbidden {
                if let Some(found) = regex.find(line) {
                    let message = pattern
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("'{}' is not allowed.", found.as_str()));
                    messages.push(Diagnostic::new(
                        format!("forbidden/{}", pattern.name),
                        severity,
                        message,
                        line_number,
                        line[..found.start()].chars().count() + 1,
                    ));
                }
            }
        }

        Ok(DiagnosticResult::new(path, messages))
    }
}
