//! Download session orchestration.
//!
//! `DownloadSession` composes the planner, scheduler, estimator and
//! reassembler into the full state machine:
//!
//! ```text
//! idle -> preparing -> downloading <-> paused
//!                          |
//!                          +-> completed | error | cancelled   (terminal)
//! ```
//!
//! The session owns all chunk and scheduler state; external collaborators
//! interact through a cloneable [`SessionControls`] handle (pause / resume /
//! cancel) and the progress, completion and error callbacks. Control calls
//! in a terminal state are no-ops, not errors; a new session must be created
//! to retry.
//!
//! Cancellation is reported through the state transition, never through the
//! error callback.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::assemble;
use crate::config::EngineConfig;
use crate::error::DownloadError;
use crate::fetch::{ChunkFetch, HttpChunkFetcher};
use crate::history::{DownloadStatus, HistoryLedger, HistoryRecord};
use crate::plan::{self, DownloadTarget};
use crate::progress::{
    CompletionCallback, CompletionInfo, ErrorCallback, ProgressCallback, SpeedEstimator,
};
use crate::scheduler::ConcurrencyScheduler;

/// States of a download session. `Completed`, `Error` and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Preparing,
    Downloading,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl SessionState {
    /// Whether no further transition is legal out of this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Callback invoked on every state transition.
pub type StateCallback = Box<dyn Fn(SessionState) + Send + Sync>;

/// State shared between the running session and its control handles.
struct SessionShared {
    state: RwLock<SessionState>,
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
    on_state: RwLock<Option<StateCallback>>,
}

impl SessionShared {
    fn emit_state(&self, state: SessionState) {
        if let Some(cb) = self.on_state.read().as_ref() {
            cb(state);
        }
    }

    /// Unconditional transition, except that terminal states are never
    /// overwritten (a cancel that raced a failure stays cancelled).
    fn set_state(&self, to: SessionState) {
        {
            let mut state = self.state.write();
            if state.is_terminal() || *state == to {
                return;
            }
            *state = to;
        }
        self.emit_state(to);
    }

    /// Transition only when currently in `from`. Returns whether it fired.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        {
            let mut state = self.state.write();
            if *state != from {
                return false;
            }
            *state = to;
        }
        self.emit_state(to);
        true
    }
}

/// Cloneable control surface for a running session.
#[derive(Clone)]
pub struct SessionControls {
    shared: Arc<SessionShared>,
}

impl SessionControls {
    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Stop issuing new chunk fetches. Chunks already in flight finish
    /// normally. No-op unless the session is downloading.
    pub fn pause(&self) {
        if self.shared.transition(SessionState::Downloading, SessionState::Paused) {
            let _ = self.shared.pause_tx.send(true);
            debug!("download paused");
        }
    }

    /// Resume issuing chunk fetches. Wakes the scheduler immediately.
    /// No-op unless the session is paused.
    pub fn resume(&self) {
        if self.shared.transition(SessionState::Paused, SessionState::Downloading) {
            let _ = self.shared.pause_tx.send(false);
            debug!("download resumed");
        }
    }

    /// Cancel the session. All in-flight and future fetch attempts observe
    /// the shared token, including mid-backoff. No-op in a terminal state.
    pub fn cancel(&self) {
        let fired = {
            let mut state = self.shared.state.write();
            if state.is_terminal() {
                false
            } else {
                *state = SessionState::Cancelled;
                true
            }
        };
        if fired {
            self.shared.emit_state(SessionState::Cancelled);
            self.shared.cancel.cancel();
            info!("download cancelled");
        }
    }
}

/// Bookkeeping carried across the run for history and error reporting.
#[derive(Default)]
struct RunStats {
    started: bool,
    downloaded: u64,
    completed_indices: Vec<u32>,
}

/// One download of one artifact, driven to a terminal state by [`run`].
///
/// [`run`]: DownloadSession::run
pub struct DownloadSession {
    target: DownloadTarget,
    config: EngineConfig,
    version: Option<String>,
    fetcher: Arc<dyn ChunkFetch>,
    ledger: Option<HistoryLedger>,
    shared: Arc<SessionShared>,
    pause_rx: watch::Receiver<bool>,
    on_progress: Option<ProgressCallback>,
    on_complete: Option<CompletionCallback>,
    on_error: Option<ErrorCallback>,
    record_id: String,
}

impl DownloadSession {
    /// Create a session for the target with an HTTP fetcher built from the
    /// configuration.
    pub fn new(target: DownloadTarget, config: EngineConfig) -> Self {
        let (pause_tx, pause_rx) = watch::channel(false);
        let fetcher: Arc<dyn ChunkFetch> = Arc::new(HttpChunkFetcher::from_config(&config));
        let record_id = format!(
            "{}-{}",
            target.filename,
            chrono::Utc::now().timestamp_millis()
        );

        Self {
            target,
            config,
            version: None,
            fetcher,
            ledger: None,
            shared: Arc::new(SessionShared {
                state: RwLock::new(SessionState::Idle),
                cancel: CancellationToken::new(),
                pause_tx,
                on_state: RwLock::new(None),
            }),
            pause_rx,
            on_progress: None,
            on_complete: None,
            on_error: None,
            record_id,
        }
    }

    /// Replace the chunk fetcher (tests, alternative transports).
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ChunkFetch>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Record this session's lifecycle in a history ledger.
    pub fn with_history(mut self, ledger: HistoryLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Release version recorded alongside history entries.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the progress callback, invoked per completed chunk subject to the
    /// sampling interval.
    pub fn on_progress(mut self, cb: impl Fn(&crate::progress::ProgressSample) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    /// Set the completion callback, invoked exactly once on success.
    pub fn on_complete(mut self, cb: impl Fn(&CompletionInfo) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(cb));
        self
    }

    /// Set the error callback, invoked exactly once on terminal failure.
    /// Cancellation does not reach this callback.
    pub fn on_error(mut self, cb: impl Fn(&DownloadError, bool) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(cb));
        self
    }

    /// Set the state-transition callback.
    pub fn on_state(self, cb: impl Fn(SessionState) + Send + Sync + 'static) -> Self {
        *self.shared.on_state.write() = Some(Box::new(cb));
        self
    }

    /// A cloneable control handle for this session.
    pub fn controls(&self) -> SessionControls {
        SessionControls {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Drive the download to a terminal state and return the artifact bytes.
    ///
    /// Persisting the artifact (save-as dialog, file write) is the caller's
    /// step. On cancellation this returns `Err(Cancelled)` with the state
    /// set to `cancelled`; the error callback stays silent for that case.
    pub async fn run(mut self) -> Result<Vec<u8>, DownloadError> {
        let mut stats = RunStats::default();

        match self.execute(&mut stats).await {
            Ok(artifact) => {
                self.shared.set_state(SessionState::Completed);
                self.record(DownloadStatus::Completed, &stats).await;
                Ok(artifact)
            }
            Err(err) if err.is_cancelled() => {
                self.shared.set_state(SessionState::Cancelled);
                if stats.started {
                    self.record(DownloadStatus::Cancelled, &stats).await;
                }
                Err(err)
            }
            Err(err) => {
                self.shared.set_state(SessionState::Error);
                if let Some(cb) = &self.on_error {
                    let recoverable = !stats.completed_indices.is_empty();
                    cb(&err, recoverable);
                }
                if stats.started {
                    self.record(DownloadStatus::Failed, &stats).await;
                }
                Err(err)
            }
        }
    }

    async fn execute(&mut self, stats: &mut RunStats) -> Result<Vec<u8>, DownloadError> {
        self.shared.set_state(SessionState::Preparing);

        let mut chunks = plan::plan(self.target.total_size, self.config.chunk_size)?;
        let total_chunks = chunks.len();

        stats.started = true;
        self.record(DownloadStatus::Downloading, stats).await;

        info!(
            url = %self.target.url,
            size = self.target.total_size,
            chunks = total_chunks,
            concurrency = self.config.max_concurrent,
            "starting chunked download"
        );

        self.shared.set_state(SessionState::Downloading);
        let started = Instant::now();

        let scheduler = ConcurrencyScheduler::new(self.config.max_concurrent);
        let cancel = self.shared.cancel.clone();
        let mut pause_rx = self.pause_rx.clone();
        let mut estimator =
            SpeedEstimator::new(self.target.total_size, self.config.sample_interval);
        let on_progress = self.on_progress.as_ref();

        scheduler
            .run(
                &self.target,
                &mut chunks,
                Arc::clone(&self.fetcher),
                &cancel,
                &mut pause_rx,
                |index, bytes| {
                    stats.downloaded += bytes;
                    stats.completed_indices.push(index);
                    let sample = estimator.update(
                        stats.downloaded,
                        stats.completed_indices.len(),
                        total_chunks,
                        Instant::now(),
                    );
                    if let (Some(sample), Some(cb)) = (sample, on_progress) {
                        cb(&sample);
                    }
                },
            )
            .await?;

        // A cancel that landed between the last settle and here still wins.
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let artifact = assemble::combine(&mut chunks)?;

        let final_sample =
            estimator.finalize(stats.downloaded, stats.completed_indices.len(), total_chunks);
        if let Some(cb) = &self.on_progress {
            cb(&final_sample);
        }

        let duration = started.elapsed();
        info!(
            bytes = artifact.len(),
            duration_secs = duration.as_secs_f64(),
            "download complete"
        );
        if let Some(cb) = &self.on_complete {
            cb(&CompletionInfo {
                filename: self.target.filename.clone(),
                total_size: self.target.total_size,
                duration_seconds: duration.as_secs_f64(),
            });
        }

        Ok(artifact)
    }

    /// Best-effort history write; the ledger logs its own failures.
    async fn record(&self, status: DownloadStatus, stats: &RunStats) {
        let Some(ledger) = &self.ledger else { return };
        ledger
            .record(HistoryRecord {
                id: self.record_id.clone(),
                version: self.version.clone(),
                filename: self.target.filename.clone(),
                size: self.target.total_size,
                downloaded_bytes: stats.downloaded,
                total_bytes: self.target.total_size,
                status,
                timestamp_iso: chrono::Utc::now().to_rfc3339(),
                url: self.target.url.clone(),
                completed_chunk_indices: stats.completed_indices.clone(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchControls, FetchFuture, FetchedChunk};
    use crate::history::HistoryLedger;
    use crate::plan::Chunk;
    use crate::storage::MemoryStore;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fetcher that synthesizes chunk payloads, optionally failing a set of
    /// chunk indices terminally.
    struct StubFetcher {
        delay: Duration,
        failing: Vec<u32>,
    }

    impl StubFetcher {
        fn ok(delay: Duration) -> Self {
            Self {
                delay,
                failing: Vec::new(),
            }
        }

        fn failing(delay: Duration, indices: &[u32]) -> Self {
            Self {
                delay,
                failing: indices.to_vec(),
            }
        }
    }

    impl ChunkFetch for StubFetcher {
        fn fetch(
            &self,
            _target: &DownloadTarget,
            chunk: &Chunk,
            controls: FetchControls,
        ) -> FetchFuture {
            let delay = self.delay;
            let fails = self.failing.contains(&chunk.index);
            let (index, start, end) = (chunk.index, chunk.start, chunk.end);
            let cancel = controls.cancel_token();

            Box::pin(async move {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                if fails {
                    return Err(DownloadError::ChunkFetchFailed {
                        index,
                        attempts: 3,
                        last_error: Box::new(DownloadError::Remote {
                            status: 500,
                            url: "http://test".to_string(),
                        }),
                    });
                }
                let data: Vec<u8> = (start..=end).map(|b| (b % 251) as u8).collect();
                Ok(FetchedChunk {
                    index,
                    data: Bytes::from(data),
                    retries: 0,
                })
            })
        }
    }

    fn session(total: u64, fetcher: StubFetcher) -> DownloadSession {
        let target = DownloadTarget::new("http://test/artifact.bin", "artifact.bin", total);
        let config = EngineConfig::default()
            .with_chunk_size(100)
            .with_max_concurrent(2)
            .with_sample_interval(Duration::ZERO);
        DownloadSession::new(target, config).with_fetcher(Arc::new(fetcher))
    }

    #[tokio::test]
    async fn test_successful_run_reaches_completed() {
        let session = session(500, StubFetcher::ok(Duration::from_millis(2)));
        let controls = session.controls();
        assert_eq!(controls.state(), SessionState::Idle);

        let artifact = session.run().await.unwrap();
        assert_eq!(artifact.len(), 500);
        assert_eq!(controls.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_completion_callback_fires_exactly_once() {
        let completions = Arc::new(AtomicUsize::new(0));
        let completions_clone = Arc::clone(&completions);

        let session = session(300, StubFetcher::ok(Duration::from_millis(1))).on_complete(
            move |info| {
                assert_eq!(info.filename, "artifact.bin");
                assert_eq!(info.total_size, 300);
                completions_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        session.run().await.unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_progress_reports_all_chunks() {
        let last_completed = Arc::new(AtomicUsize::new(0));
        let last_clone = Arc::clone(&last_completed);

        let session = session(500, StubFetcher::ok(Duration::from_millis(1))).on_progress(
            move |sample| {
                last_clone.store(sample.chunks_completed, Ordering::SeqCst);
            },
        );

        session.run().await.unwrap();
        assert_eq!(last_completed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_invalid_input_reports_unrecoverable() {
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = Arc::clone(&errors);

        let target = DownloadTarget::new("http://test/x.bin", "x.bin", 0);
        let session = DownloadSession::new(target, EngineConfig::default())
            .with_fetcher(Arc::new(StubFetcher::ok(Duration::ZERO)))
            .on_error(move |_err, recoverable| {
                assert!(!recoverable);
                errors_clone.fetch_add(1, Ordering::SeqCst);
            });
        let controls = session.controls();

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidInput(_)));
        assert_eq!(controls.state(), SessionState::Error);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chunk_failure_reports_recoverable_when_progress_made() {
        let recoverable_seen = Arc::new(AtomicUsize::new(0));
        let recoverable_clone = Arc::clone(&recoverable_seen);

        // Chunk 4 fails; with concurrency 2 and equal delays, earlier chunks
        // complete first.
        let session = session(500, StubFetcher::failing(Duration::from_millis(5), &[4]))
            .on_error(move |err, recoverable| {
                assert!(matches!(err, DownloadError::ChunkFetchFailed { index: 4, .. }));
                if recoverable {
                    recoverable_clone.fetch_add(1, Ordering::SeqCst);
                }
            });
        let controls = session.controls();

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, DownloadError::ChunkFetchFailed { .. }));
        assert_eq!(controls.state(), SessionState::Error);
        assert_eq!(recoverable_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_suppresses_error_callback() {
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = Arc::clone(&errors);

        let session = session(500, StubFetcher::ok(Duration::from_secs(30)))
            .on_error(move |_err, _recoverable| {
                errors_clone.fetch_add(1, Ordering::SeqCst);
            });
        let controls = session.controls();

        let handle = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        controls.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(controls.state(), SessionState::Cancelled);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pause_and_resume_roundtrip() {
        let session = session(400, StubFetcher::ok(Duration::from_millis(25)));
        let controls = session.controls();

        let handle = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(10)).await;

        controls.pause();
        assert_eq!(controls.state(), SessionState::Paused);

        tokio::time::sleep(Duration::from_millis(50)).await;
        controls.resume();
        assert_eq!(controls.state(), SessionState::Downloading);

        let artifact = handle.await.unwrap().unwrap();
        assert_eq!(artifact.len(), 400);
        assert_eq!(controls.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_controls_are_noops_in_terminal_state() {
        let session = session(200, StubFetcher::ok(Duration::from_millis(1)));
        let controls = session.controls();

        session.run().await.unwrap();
        assert_eq!(controls.state(), SessionState::Completed);

        controls.pause();
        controls.resume();
        controls.cancel();
        assert_eq!(controls.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_state_transitions_observed_in_order() {
        let states = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let states_clone = Arc::clone(&states);

        let session = session(200, StubFetcher::ok(Duration::from_millis(1)))
            .on_state(move |state| states_clone.lock().push(state));

        session.run().await.unwrap();

        let seen = states.lock().clone();
        assert_eq!(
            seen,
            vec![
                SessionState::Preparing,
                SessionState::Downloading,
                SessionState::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_history_records_terminal_status() {
        let store = Arc::new(MemoryStore::new());
        let ledger = HistoryLedger::new(Arc::clone(&store) as Arc<dyn crate::storage::KeyValueStore>);

        let session = session(300, StubFetcher::ok(Duration::from_millis(1)))
            .with_history(ledger.clone())
            .with_version("1.4.0");
        session.run().await.unwrap();

        let entries = ledger.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, DownloadStatus::Completed);
        assert_eq!(entries[0].version.as_deref(), Some("1.4.0"));
        assert_eq!(entries[0].downloaded_bytes, 300);
        let mut indices = entries[0].completed_chunk_indices.clone();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_cancelled_history_keeps_completed_indices() {
        let store = Arc::new(MemoryStore::new());
        let ledger = HistoryLedger::new(store as Arc<dyn crate::storage::KeyValueStore>);

        // First chunk quick, the rest slow enough to cancel in between.
        struct MixedFetcher;
        impl ChunkFetch for MixedFetcher {
            fn fetch(
                &self,
                _target: &DownloadTarget,
                chunk: &Chunk,
                controls: FetchControls,
            ) -> FetchFuture {
                let (index, start, end) = (chunk.index, chunk.start, chunk.end);
                let delay = if index == 0 {
                    Duration::from_millis(1)
                } else {
                    Duration::from_secs(30)
                };
                let cancel = controls.cancel_token();
                Box::pin(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    let data: Vec<u8> = (start..=end).map(|b| (b % 251) as u8).collect();
                    Ok(FetchedChunk { index, data: Bytes::from(data), retries: 0 })
                })
            }
        }

        let target = DownloadTarget::new("http://test/artifact.bin", "artifact.bin", 300);
        let config = EngineConfig::default()
            .with_chunk_size(100)
            .with_max_concurrent(1)
            .with_sample_interval(Duration::ZERO);
        let session = DownloadSession::new(target, config)
            .with_fetcher(Arc::new(MixedFetcher))
            .with_history(ledger.clone());
        let controls = session.controls();

        let handle = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        controls.cancel();
        handle.await.unwrap().unwrap_err();

        let incomplete = ledger.incomplete().await;
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].status, DownloadStatus::Cancelled);
        assert_eq!(incomplete[0].completed_chunk_indices, vec![0]);
        assert_eq!(incomplete[0].downloaded_bytes, 100);
    }
}
