//! Progress sampling and speed estimation.
//!
//! The estimator keeps a rolling bytes-per-second measurement, recomputed at
//! most once per sampling interval so single fast chunks do not produce noisy
//! instantaneous rates. ETA is derived from the current speed and reported as
//! `None` while indeterminate; callers never see NaN or infinity.

use std::time::{Duration, Instant};

use crate::error::DownloadError;

/// Snapshot of download progress, recomputed on chunk completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    /// Total bytes downloaded so far.
    pub downloaded_bytes: u64,
    /// Total expected bytes.
    pub total_bytes: u64,
    /// Completion percentage in `[0, 100]`.
    pub percentage: f64,
    /// Rolling download speed in bytes per second.
    pub speed_bytes_per_sec: f64,
    /// Estimated seconds remaining, or `None` while the speed is unknown.
    pub eta_seconds: Option<u64>,
    /// Number of chunks fully downloaded.
    pub chunks_completed: usize,
    /// Total number of chunks in the plan.
    pub total_chunks: usize,
}

/// Callback invoked with progress snapshots.
pub type ProgressCallback = Box<dyn Fn(&ProgressSample) + Send + Sync>;

/// Payload for the one-shot completion callback.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionInfo {
    /// Filename of the downloaded artifact.
    pub filename: String,
    /// Total artifact size in bytes.
    pub total_size: u64,
    /// Wall-clock duration of the download in seconds.
    pub duration_seconds: f64,
}

/// Callback invoked exactly once on successful completion.
pub type CompletionCallback = Box<dyn Fn(&CompletionInfo) + Send + Sync>;

/// Callback invoked exactly once on terminal failure.
///
/// The boolean is `true` when at least one chunk had completed before the
/// failure, signalling that a fresh attempt could reuse partial progress.
pub type ErrorCallback = Box<dyn Fn(&DownloadError, bool) + Send + Sync>;

/// Rolling speed and ETA estimator.
///
/// `update` is called with the cumulative byte count after every chunk
/// completion; it returns a fresh sample only when the sampling interval has
/// elapsed, which doubles as the rate limit on progress callbacks.
#[derive(Debug)]
pub struct SpeedEstimator {
    total_bytes: u64,
    min_interval: Duration,
    last_sample_at: Option<Instant>,
    last_sample_bytes: u64,
    speed_bytes_per_sec: f64,
}

impl SpeedEstimator {
    /// Create an estimator for a download of `total_bytes`.
    pub fn new(total_bytes: u64, min_interval: Duration) -> Self {
        Self {
            total_bytes,
            min_interval,
            last_sample_at: None,
            last_sample_bytes: 0,
            speed_bytes_per_sec: 0.0,
        }
    }

    /// Record the cumulative byte count at `now`.
    ///
    /// Returns a new sample when enough time has passed since the previous
    /// one, `None` otherwise. The first call always produces a sample (with
    /// an unknown speed) so callers can render initial progress.
    pub fn update(
        &mut self,
        downloaded: u64,
        chunks_completed: usize,
        total_chunks: usize,
        now: Instant,
    ) -> Option<ProgressSample> {
        match self.last_sample_at {
            None => {
                self.last_sample_at = Some(now);
                self.last_sample_bytes = downloaded;
            }
            Some(prev) => {
                let elapsed = now.duration_since(prev);
                if elapsed < self.min_interval {
                    return None;
                }
                if !elapsed.is_zero() {
                    let delta = downloaded.saturating_sub(self.last_sample_bytes);
                    self.speed_bytes_per_sec = delta as f64 / elapsed.as_secs_f64();
                }
                self.last_sample_at = Some(now);
                self.last_sample_bytes = downloaded;
            }
        }

        Some(self.sample(downloaded, chunks_completed, total_chunks))
    }

    /// Produce a final sample regardless of the sampling interval.
    ///
    /// Used at completion so the last progress event always reflects the
    /// terminal byte count.
    pub fn finalize(
        &self,
        downloaded: u64,
        chunks_completed: usize,
        total_chunks: usize,
    ) -> ProgressSample {
        self.sample(downloaded, chunks_completed, total_chunks)
    }

    fn sample(
        &self,
        downloaded: u64,
        chunks_completed: usize,
        total_chunks: usize,
    ) -> ProgressSample {
        let percentage = if self.total_bytes > 0 {
            (downloaded as f64 / self.total_bytes as f64) * 100.0
        } else {
            0.0
        };

        let remaining = self.total_bytes.saturating_sub(downloaded);
        let eta_seconds = if self.speed_bytes_per_sec > 0.0 {
            Some((remaining as f64 / self.speed_bytes_per_sec).ceil() as u64)
        } else {
            None
        };

        ProgressSample {
            downloaded_bytes: downloaded,
            total_bytes: self.total_bytes,
            percentage: percentage.min(100.0),
            speed_bytes_per_sec: self.speed_bytes_per_sec,
            eta_seconds,
            chunks_completed,
            total_chunks,
        }
    }
}
