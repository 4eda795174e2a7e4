use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};

use crate::cli::{Cli, OutputFormat, Output};
use crate::config::ConfigLoader;
use crate::lint::{DiagnosticResult, LintConfig, TargetCollector, TextRules};
use crate::parallel::{Coordinator, StreamHooks};

/// Exit code when any error-severity diagnostic was reported.
const EXIT_PROBLEMS: u8 = 1;
/// Exit code when the dispatch itself failed.
const EXIT_DISPATCH_FAILED: u8 = 2;

pub async fn execute(cli: &Cli, output: &Output) -> Result<ExitCode> {
    let start = Instant::now();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::from_file(path)?,
        None => ConfigLoader::discover(&std::env::current_dir().context("no working directory")?),
    };
    let mut settings = loader.load()?;
    if let Some(concurrency) = cli.concurrency {
        settings.dispatch.concurrency = concurrency;
    }
    if let Some(strategy) = cli.strategy {
        settings.dispatch.strategy = strategy;
    }

    let paths = if cli.paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        cli.paths.clone()
    };
    let rules = Arc::new(LintConfig::new(serde_json::to_value(&settings.rules)?));
    let targets = TargetCollector::new(&settings.targets.include, rules)?.collect(&paths)?;
    output.verbose(&format!(
        "Linting {} files (concurrency {}, strategy {})",
        targets.len(),
        settings.dispatch.concurrency,
        settings.dispatch.strategy.as_str()
    ));

    let evaluated = Arc::new(AtomicUsize::new(0));
    let hooks = StreamHooks::new().on_each_result({
        let evaluated = Arc::clone(&evaluated);
        move |_: &DiagnosticResult| {
            evaluated.fetch_add(1, Ordering::Relaxed);
        }
    });

    let concurrency = settings.dispatch.concurrency;
    let coordinator = Coordinator::new(Arc::new(TextRules::new())).with_settings(settings.dispatch);
    let stream = coordinator.dispatch(targets, concurrency, hooks);
    let mut results = match stream.collect_all().await {
        Ok(results) => results,
        Err(error) => {
            output.error(&format!("Lint failed: {error}"));
            return Ok(ExitCode::from(EXIT_DISPATCH_FAILED));
        }
    };
    results.sort_by(DiagnosticResult::compare_by_file_path);
    output.verbose(&format!(
        "Evaluated {} files in {:.2?}",
        evaluated.load(Ordering::Relaxed),
        start.elapsed()
    ));

    let has_errors = results.iter().any(DiagnosticResult::has_errors);
    if output.is_quiet() {
        results = DiagnosticResult::errors_only(&results);
    }
    match cli.format {
        OutputFormat::Text => output.report(&results),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
    }

    Ok(if has_errors {
        ExitCode::from(EXIT_PROBLEMS)
    } else {
        ExitCode::SUCCESS
    })
}
