//! Error types for the CLI.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to the terminal.
#[derive(Debug, Error)]
pub enum CliError {
    /// The download itself failed.
    #[error("download failed: {0}")]
    Download(#[from] rangeload::DownloadError),

    /// The server did not report a size and none was supplied.
    #[error("could not determine artifact size for {0}; pass --size")]
    UnknownSize(String),

    /// Writing the finished artifact failed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No platform data directory to keep the history ledger in.
    #[error("no storage directory available for download history")]
    NoStorageDir,
}
