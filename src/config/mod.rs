//! Configuration management for batchlint
//!
//! Settings are layered with figment (see [`core`]): the embedded
//! `default-config.toml`, then a project file, then `BATCHLINT_` environment
//! variables. Command-line flags are applied on top by the CLI.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::lint::{ErrorPolicy, RuleOptions};

pub mod core;

pub use core::ConfigLoader;

/// Fully resolved settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub dispatch: DispatchSettings,

    /// Options for the built-in text rules.
    #[serde(default)]
    pub rules: RuleOptions,

    #[serde(default)]
    pub targets: TargetSettings,
}

/// The `[dispatch]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub concurrency: Concurrency,
    pub strategy: Strategy,
    /// Targets per context in its startup slice.
    pub chunk_size: usize,
    /// Upper bound on host parallelism (0 = no limit)
    pub max_threads: usize,
    /// Share of CPU cores to use (1-100)
    pub thread_percentage: u8,
    pub on_evaluation_error: ErrorPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::Auto,
            strategy: Strategy::Auto,
            chunk_size: 4,
            max_threads: 0,
            thread_percentage: 100,
            on_evaluation_error: ErrorPolicy::Abort,
        }
    }
}

/// The `[targets]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    /// Globs matched against paths found while walking directories.
    pub include: Vec<String>,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            include: vec!["**/*".to_string()],
        }
    }
}

/// Requested concurrency: a fixed count, `auto`, or `off` (sequential).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawConcurrency", into = "String")]
pub enum Concurrency {
    Off,
    #[default]
    Auto,
    Fixed(NonZeroUsize),
}

#[derive(Debug, thiserror::Error)]
#[error("Option concurrency: '{0}' is not a positive integer, 'auto' or 'off'.")]
pub struct InvalidConcurrency(String);

impl FromStr for Concurrency {
    type Err = InvalidConcurrency;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "auto" => Ok(Concurrency::Auto),
            "off" => Ok(Concurrency::Off),
            other => other
                .parse::<NonZeroUsize>()
                .map(Concurrency::Fixed)
                .map_err(|_| InvalidConcurrency(value.to_string())),
        }
    }
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Off => f.write_str("off"),
            Concurrency::Auto => f.write_str("auto"),
            Concurrency::Fixed(n) => write!(f, "{n}"),
        }
    }
}

impl From<Concurrency> for String {
    fn from(value: Concurrency) -> Self {
        value.to_string()
    }
}

/// Config files and env vars may give the count as a number or a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawConcurrency {
    Number(i64),
    Text(String),
}

impl TryFrom<RawConcurrency> for Concurrency {
    type Error = InvalidConcurrency;

    fn try_from(raw: RawConcurrency) -> Result<Self, Self::Error> {
        match raw {
            RawConcurrency::Number(n) => usize::try_from(n)
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Concurrency::Fixed)
                .ok_or_else(|| InvalidConcurrency(n.to_string())),
            RawConcurrency::Text(text) => text.parse(),
        }
    }
}

/// Where evaluations run when concurrency is above 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Isolated threads when available, processes otherwise
    #[default]
    Auto,
    /// Cooperative workers inside the dispatching task
    InProcess,
    Threads,
    Processes,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Auto => "auto",
            Strategy::InProcess => "in-process",
            Strategy::Threads => "threads",
            Strategy::Processes => "processes",
        }
    }
}
