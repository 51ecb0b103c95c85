//! Chunk planning for byte-range downloads.
//!
//! A download target is split into fixed-size chunks whose ranges partition
//! `[0, total_size)` with no gaps or overlaps. Planning is pure and
//! deterministic; the scheduler owns all later mutation of the chunks.

use bytes::Bytes;

use crate::error::DownloadError;

/// What to download. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Source URL of the artifact.
    pub url: String,
    /// Filename to report in progress and history records.
    pub filename: String,
    /// Total artifact size in bytes. Must be greater than zero.
    pub total_size: u64,
}

impl DownloadTarget {
    /// Create a new download target.
    pub fn new(url: impl Into<String>, filename: impl Into<String>, total_size: u64) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            total_size,
        }
    }
}

/// A contiguous byte range of the target, fetched as one HTTP request.
///
/// `end` is inclusive. `data` is assigned by the scheduler when the fetch
/// succeeds and taken back out during reassembly.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based chunk index.
    pub index: u32,
    /// First byte offset of the range.
    pub start: u64,
    /// Last byte offset of the range (inclusive).
    pub end: u64,
    /// Fetched payload, present once the chunk has completed.
    pub data: Option<Bytes>,
    /// Number of failed attempts before this chunk succeeded.
    pub retry_count: u32,
}

impl Chunk {
    /// Length of the byte range in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether the chunk's payload has been fetched.
    pub fn is_fetched(&self) -> bool {
        self.data.is_some()
    }
}

/// Split `[0, total_size)` into an ordered list of chunks.
///
/// Produces `ceil(total_size / chunk_size)` chunks; every chunk spans exactly
/// `chunk_size` bytes except possibly the last, whose `end` is always
/// `total_size - 1`.
///
/// # Errors
///
/// Returns `InvalidInput` if `total_size` or `chunk_size` is zero.
pub fn plan(total_size: u64, chunk_size: u64) -> Result<Vec<Chunk>, DownloadError> {
    if total_size == 0 {
        return Err(DownloadError::InvalidInput(
            "total size must be greater than zero".to_string(),
        ));
    }
    if chunk_size == 0 {
        return Err(DownloadError::InvalidInput(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let count = (total_size - 1) / chunk_size + 1;
    let mut chunks = Vec::with_capacity(count as usize);
    let mut start = 0u64;
    let mut index = 0u32;

    while start < total_size {
        let end = start.saturating_add(chunk_size - 1).min(total_size - 1);
        chunks.push(Chunk {
            index,
            start,
            end,
            data: None,
            retry_count: 0,
        });
        start = end + 1;
        index += 1;
    }

    Ok(chunks)
}
