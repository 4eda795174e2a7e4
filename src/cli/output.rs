//! Terminal output for batchlint
//!
//! Styled messages in the same spirit as lint-staged and eslint's stylish
//! formatter: one block per file, a summary line at the end.

use console::style;

use crate::lint::{Diagnostic, DiagnosticResult, Severity};

/// Output handler for consistent CLI formatting
pub struct Output {
    verbose: bool,
    quiet: bool,
}

impl Output {
    /// Create a new output handler
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("✔").green(), message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        // Errors are always shown, even in quiet mode
        eprintln!("{} {}", style("✖").red(), message);
    }

    /// Print a verbose message (only if verbose mode is enabled)
    pub fn verbose(&self, message: &str) {
        if self.verbose {
            eprintln!("{} {}", style("ℹ").dim(), style(message).dim());
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Print every result that has messages, then a summary line.
    pub fn report(&self, results: &[DiagnosticResult]) {
        for result in results.iter().filter(|r| !r.messages.is_empty()) {
            println!("\n{}", style(result.file_path.display()).underlined());
            for message in &result.messages {
                self.diagnostic(message);
            }
        }
        self.summary(results);
    }

    fn diagnostic(&self, message: &Diagnostic) {
        let severity = match message.severity {
            Severity::Error => style("error").red(),
            Severity::Warning => style("warning").yellow(),
        };
        println!(
            "  {:>8}  {:<7}  {}  {}",
            style(format!("{}:{}", message.line, message.column)).dim(),
            severity,
            message.message,
            style(message.rule_id.as_deref().unwrap_or("")).dim()
        );
    }

    fn summary(&self, results: &[DiagnosticResult]) {
        let errors: usize = results.iter().map(|r| r.error_count).sum();
        let warnings: usize = results.iter().map(|r| r.warning_count).sum();
        let problems = errors + warnings;
        if problems == 0 {
            self.success(&format!("{} files linted, no problems", results.len()));
            return;
        }

        let line = format!(
            "{} {} ({} {}, {} {})",
            problems,
            plural(problems, "problem"),
            errors,
            plural(errors, "error"),
            warnings,
            plural(warnings, "warning")
        );
        println!();
        if errors > 0 {
            println!("{} {}", style("✖").red().bold(), style(line).red().bold());
        } else {
            println!("{} {}", style("⚠").yellow().bold(), style(line).yellow().bold());
        }
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}
