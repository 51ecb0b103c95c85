//! Rangeload CLI - command-line chunked downloader.
//!
//! Thin front-end over the `rangeload` library: it supplies the download
//! target, renders progress, and wires Ctrl-C to session cancellation.

mod commands;
mod error;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rangeload", version, about = "Resilient chunked HTTP downloader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download an artifact with parallel byte-range requests
    Get(commands::get::GetArgs),
    /// Show the download history ledger
    History(commands::history::HistoryArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Get(args) => commands::get::run(args).await,
        Command::History(args) => commands::history::run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
