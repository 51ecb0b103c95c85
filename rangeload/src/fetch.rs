//! HTTP byte-range chunk fetching with retry and cancellation.
//!
//! `HttpChunkFetcher` issues one `Range` GET per chunk, retrying transient
//! failures with exponential backoff. Cancellation is checked before every
//! attempt and raced against every backoff sleep, so a cancel lands within
//! one check interval instead of after the delay elapses.
//!
//! The `ChunkFetch` trait is the seam between the scheduler and the network:
//! the scheduler only sees boxed futures, so tests drive it with an in-memory
//! fetcher.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::DownloadError;
use crate::plan::{Chunk, DownloadTarget};

/// Cooperative control signals observed inside a chunk fetch.
///
/// Cancellation is honored immediately - before each attempt and during
/// backoff sleeps. The pause flag is honored between attempts: a fetch whose
/// network call is already in flight finishes normally, but it will not
/// start a retry attempt while paused.
#[derive(Debug, Clone)]
pub struct FetchControls {
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
}

impl FetchControls {
    /// Bundle a cancellation token with a pause flag receiver.
    pub fn new(cancel: CancellationToken, paused: watch::Receiver<bool>) -> Self {
        Self { cancel, paused }
    }

    /// Controls that can be cancelled but never pause.
    pub fn unpaused(cancel: CancellationToken) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(cancel, rx)
    }

    /// Whether cancellation has been observed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The cancellation token, for implementations that race it themselves.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Suspend until the pause flag clears, waking immediately on resume.
    ///
    /// Returns `Cancelled` if cancellation fires while waiting, or if the
    /// control side goes away with the flag still raised.
    pub async fn wait_if_paused(&mut self) -> Result<(), DownloadError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            if !*self.paused.borrow() {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                changed = self.paused.changed() => {
                    if changed.is_err() {
                        // Sender dropped while paused: nothing can resume us.
                        return Err(DownloadError::Cancelled);
                    }
                }
            }
        }
    }

    fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

/// A successfully fetched chunk payload.
#[derive(Debug, Clone)]
pub struct FetchedChunk {
    /// Index of the chunk this payload belongs to.
    pub index: u32,
    /// The raw bytes of the chunk's range.
    pub data: Bytes,
    /// Number of failed attempts before this one succeeded.
    pub retries: u32,
}

/// Boxed future returned by `ChunkFetch::fetch`.
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<FetchedChunk, DownloadError>> + Send>>;

/// Fetches a single chunk of the target.
///
/// Implementations own their retry policy; the returned future must resolve
/// to `Cancelled` promptly once the token fires, and must never report
/// cancellation as a retryable failure.
pub trait ChunkFetch: Send + Sync {
    /// Fetch the chunk's byte range. The future must be self-contained
    /// (implementations clone what they need) so the scheduler can spawn it.
    fn fetch(&self, target: &DownloadTarget, chunk: &Chunk, controls: FetchControls)
        -> FetchFuture;
}

/// Delay before retry attempt `retry_count` (0-indexed): `base * 2^n`.
pub fn retry_delay(retry_count: u32, base: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry_count))
}

/// Result of a HEAD probe against a download URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Reported `Content-Length`, when present.
    pub content_length: Option<u64>,
    /// Whether the server advertises `Accept-Ranges: bytes`.
    pub accepts_ranges: bool,
}

/// HTTP chunk fetcher over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpChunkFetcher {
    client: Client,
    max_retries: u32,
    base_delay: Duration,
}

impl Default for HttpChunkFetcher {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl HttpChunkFetcher {
    /// Create a fetcher configured from an [`EngineConfig`].
    pub fn from_config(config: &EngineConfig) -> Self {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            max_retries: config.max_retries.max(1),
            base_delay: config.base_delay,
        }
    }

    /// Create a fetcher with a custom request timeout and default retries.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::from_config(&EngineConfig::default().with_http_timeout(timeout))
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.base_delay = base_delay;
        self
    }

    /// Probe a URL via HEAD for its size and range support.
    ///
    /// Used by callers that do not already know the artifact size.
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|err| DownloadError::Transport {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Remote {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let accepts_ranges = response
            .headers()
            .get("accept-ranges")
            .map(|v| v.to_str().unwrap_or("") == "bytes")
            .unwrap_or(false);

        Ok(ProbeInfo {
            content_length,
            accepts_ranges,
        })
    }
}

impl ChunkFetch for HttpChunkFetcher {
    fn fetch(
        &self,
        target: &DownloadTarget,
        chunk: &Chunk,
        mut controls: FetchControls,
    ) -> FetchFuture {
        let client = self.client.clone();
        let url = target.url.clone();
        let index = chunk.index;
        let start = chunk.start;
        let end = chunk.end;
        // A 200 is only acceptable when the request spans the whole resource,
        // i.e. the plan consists of a single chunk.
        let whole_resource = chunk.start == 0 && chunk.end + 1 == target.total_size;
        let max_retries = self.max_retries;
        let base_delay = self.base_delay;

        Box::pin(async move {
            let mut failures: u32 = 0;

            loop {
                if controls.is_cancelled() {
                    return Err(DownloadError::Cancelled);
                }

                match fetch_range(&client, &url, start, end, whole_resource, &controls).await {
                    Ok(data) => {
                        debug!(chunk = index, bytes = data.len(), retries = failures, "chunk fetched");
                        return Ok(FetchedChunk {
                            index,
                            data,
                            retries: failures,
                        });
                    }
                    Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                    Err(err) if err.is_retryable() => {
                        failures += 1;
                        if failures >= max_retries {
                            return Err(DownloadError::ChunkFetchFailed {
                                index,
                                attempts: failures,
                                last_error: Box::new(err),
                            });
                        }

                        let delay = retry_delay(failures - 1, base_delay);
                        warn!(
                            chunk = index,
                            attempt = failures,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "chunk fetch failed, backing off"
                        );

                        tokio::select! {
                            biased;
                            _ = controls.cancelled() => return Err(DownloadError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }

                        // A paused session defers the retry attempt until
                        // resumed; cancellation still lands immediately.
                        controls.wait_if_paused().await?;
                    }
                    Err(err) => return Err(err),
                }
            }
        })
    }
}

/// One attempt at a range request. Cancellation is raced against both the
/// request and the body read.
async fn fetch_range(
    client: &Client,
    url: &str,
    start: u64,
    end: u64,
    whole_resource: bool,
    controls: &FetchControls,
) -> Result<Bytes, DownloadError> {
    let request = client
        .get(url)
        .header(reqwest::header::RANGE, format!("bytes={start}-{end}"));

    let response = tokio::select! {
        biased;
        _ = controls.cancelled() => return Err(DownloadError::Cancelled),
        result = request.send() => result.map_err(|err| DownloadError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        })?,
    };

    let status = response.status();
    let acceptable =
        status == StatusCode::PARTIAL_CONTENT || (status == StatusCode::OK && whole_resource);
    if !acceptable {
        return Err(DownloadError::Remote {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = tokio::select! {
        biased;
        _ = controls.cancelled() => return Err(DownloadError::Cancelled),
        result = response.bytes() => result.map_err(|err| DownloadError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        })?,
    };

    Ok(body)
}
