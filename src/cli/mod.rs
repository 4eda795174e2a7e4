//! Command-line interface for batchlint
//!
//! `batchlint [PATHS]...` lints files and directories with the built-in text
//! rules. The hidden `__worker` subcommand is what process-backed execution
//! contexts run; it is not meant to be invoked by hand.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{Concurrency, Strategy};

mod commands;
mod output;

pub use output::Output;

/// batchlint - lint many files at once, in parallel
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Files or directories to lint (default: current directory)
    #[arg(value_name = "PATHS")]
    pub paths: Vec<PathBuf>,

    /// Number of concurrent workers: a positive integer, "auto" or "off"
    #[arg(long, value_name = "N|auto|off")]
    pub concurrency: Option<Concurrency>,

    /// Where evaluations run when concurrency is above 1
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Report errors only
    #[arg(short, long)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Serve the worker protocol on stdin/stdout
    #[command(name = "__worker", hide = true)]
    Worker,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Execute the CLI command
    pub async fn run(self) -> Result<ExitCode> {
        match self.command {
            Some(Commands::Worker) => commands::worker::execute().await,
            None => {
                let output = Output::new(self.verbose, self.quiet);
                commands::lint::execute(&self, &output).await
            }
        }
    }
}
