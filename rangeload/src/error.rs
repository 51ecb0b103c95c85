//! Error types for the download engine.

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can occur while planning, fetching, or assembling a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Bad construction parameters (zero total size or chunk size).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The server answered with a status we cannot accept for this request.
    #[error("{url} returned HTTP {status}")]
    Remote { status: u16, url: String },

    /// The request failed below the HTTP layer (DNS, connect, reset, timeout).
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// A single chunk exhausted its retry budget.
    #[error("chunk {index} failed after {attempts} attempts: {last_error}")]
    ChunkFetchFailed {
        index: u32,
        attempts: u32,
        last_error: Box<DownloadError>,
    },

    /// Cancellation was observed mid-fetch or mid-backoff.
    #[error("download cancelled")]
    Cancelled,

    /// A chunk reached reassembly without data. Indicates a scheduler
    /// contract violation, not a runtime condition.
    #[error("chunk {index} has no data at assembly")]
    IncompleteAssembly { index: u32 },

    /// A spawned fetch task died without producing a result.
    #[error("background task failure: {0}")]
    TaskFailure(String),
}

impl DownloadError {
    /// Whether this error is transient and worth retrying at the chunk level.
    ///
    /// Only remote statuses and transport failures are retryable; everything
    /// else either cannot succeed on retry or must surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Transport { .. })
    }

    /// Whether this error represents an observed cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
