use std::process::ExitCode;

use batchlint::Cli;
use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // stderr only: process workers own stdout for their protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BATCHLINT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {error:#}", style("✖").red());
            ExitCode::from(2)
        }
    }
}
