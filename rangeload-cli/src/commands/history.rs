//! Download history command.

use clap::Args;
use console::style;

use rangeload::DownloadStatus;

use super::common::{format_size, history_ledger};
use crate::error::CliError;

/// Arguments for the `history` command.
#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Show only paused or cancelled downloads
    #[arg(long)]
    pub incomplete: bool,
}

/// Print the download history ledger, newest first.
pub async fn run(args: HistoryArgs) -> Result<(), CliError> {
    let ledger = history_ledger()?;
    let entries = if args.incomplete {
        ledger.incomplete().await
    } else {
        ledger.list().await
    };

    if entries.is_empty() {
        println!("No download history.");
        return Ok(());
    }

    for entry in entries {
        let status = match entry.status {
            DownloadStatus::Completed => style("completed").green(),
            DownloadStatus::Failed => style("failed").red(),
            DownloadStatus::Cancelled => style("cancelled").yellow(),
            DownloadStatus::Paused => style("paused").yellow(),
            DownloadStatus::Downloading => style("downloading").cyan(),
        };

        println!(
            "{}  {:<12} {:<30} {:>10} / {:>10}  {}",
            entry.timestamp_iso,
            status,
            entry.filename,
            format_size(entry.downloaded_bytes),
            format_size(entry.total_bytes),
            entry.url,
        );
    }

    Ok(())
}
