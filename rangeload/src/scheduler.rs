//! Bounded-concurrency scheduling of chunk fetches.
//!
//! The scheduler drains a FIFO queue of chunks through a pool of at most
//! `max_concurrent` in-flight fetches, waking on whichever settles first
//! rather than barrier-waiting on the batch. One tunable covers every
//! strategy: `max_concurrent = 1` is fully sequential downloading.
//!
//! # Pause and cancellation
//!
//! Pause is cooperative: a raised pause flag stops new work from being
//! issued while chunks already in flight finish normally. The flag is a
//! `watch` channel, so `resume()` wakes the scheduler immediately instead of
//! being noticed on a poll tick.
//!
//! The first unrecoverable chunk failure cancels a child token shared by all
//! in-flight fetches and surfaces exactly one error. Chunk state is mutated
//! only here, on the scheduler's own task, as fetches settle; fetch tasks
//! just return their result.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DownloadError;
use crate::fetch::{ChunkFetch, FetchControls, FetchedChunk};
use crate::plan::{Chunk, DownloadTarget};

/// Drives chunk fetches with bounded parallelism.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyScheduler {
    max_concurrent: usize,
}

impl ConcurrencyScheduler {
    /// Create a scheduler allowing up to `max_concurrent` in-flight fetches
    /// (minimum 1).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// The configured concurrency bound.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Fetch every chunk, returning once all have succeeded or the run has
    /// terminally failed or been cancelled.
    ///
    /// `on_chunk_done` is invoked on the scheduler task with the chunk index
    /// and payload size after each successful completion, in completion
    /// order (not index order).
    pub async fn run<F>(
        &self,
        target: &DownloadTarget,
        chunks: &mut [Chunk],
        fetcher: Arc<dyn ChunkFetch>,
        cancel: &CancellationToken,
        paused: &mut watch::Receiver<bool>,
        mut on_chunk_done: F,
    ) -> Result<(), DownloadError>
    where
        F: FnMut(u32, u64),
    {
        // Child token: a chunk failure aborts the siblings without firing
        // the session-level token. Session cancellation propagates down.
        let abort = cancel.child_token();

        let mut pending: VecDeque<usize> = (0..chunks.len()).collect();
        let mut in_flight: JoinSet<(usize, Result<FetchedChunk, DownloadError>)> = JoinSet::new();
        // Cleared if the control side drops its watch sender; from then on
        // only cancellation and fetch settlement can wake us.
        let mut controls_live = true;

        loop {
            // Issue new fetches while capacity remains and we are not paused.
            while in_flight.len() < self.max_concurrent
                && !*paused.borrow()
                && !cancel.is_cancelled()
            {
                let Some(idx) = pending.pop_front() else { break };
                let controls = FetchControls::new(abort.clone(), paused.clone());
                let fut = fetcher.fetch(target, &chunks[idx], controls);
                debug!(chunk = idx, in_flight = in_flight.len() + 1, "dispatching chunk");
                in_flight.spawn(async move { (idx, fut.await) });
            }

            if in_flight.is_empty() {
                if pending.is_empty() {
                    return Ok(());
                }
                if !controls_live {
                    // Paused forever with no way to resume.
                    return Err(DownloadError::Cancelled);
                }
                // Paused with nothing running: sleep until a control change.
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                    changed = paused.changed() => {
                        if changed.is_err() {
                            controls_live = false;
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    in_flight.shutdown().await;
                    return Err(DownloadError::Cancelled);
                }

                // A pause/resume flip re-evaluates issuance above.
                changed = paused.changed(), if controls_live => {
                    if changed.is_err() {
                        controls_live = false;
                    }
                }

                settled = in_flight.join_next() => {
                    let Some(settled) = settled else { continue };
                    let (idx, result) = match settled {
                        Ok(pair) => pair,
                        Err(err) => {
                            abort.cancel();
                            in_flight.shutdown().await;
                            return Err(DownloadError::TaskFailure(err.to_string()));
                        }
                    };

                    match result {
                        Ok(fetched) => {
                            let bytes = fetched.data.len() as u64;
                            chunks[idx].retry_count = fetched.retries;
                            chunks[idx].data = Some(fetched.data);
                            on_chunk_done(idx as u32, bytes);
                        }
                        Err(DownloadError::Cancelled) => {
                            in_flight.shutdown().await;
                            return Err(DownloadError::Cancelled);
                        }
                        Err(err) => {
                            warn!(chunk = idx, error = %err, "chunk failed, aborting remaining fetches");
                            abort.cancel();
                            in_flight.shutdown().await;
                            return Err(err);
                        }
                    }
                }
            }
        }
    }
}
