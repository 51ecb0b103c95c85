//! Download history ledger.
//!
//! A capacity-bounded record of past and interrupted downloads, used by the
//! surrounding application to offer "resume" affordances. Only metadata is
//! recorded; chunk bytes are never persisted, so the completed-chunk index
//! list is an advisory hint, not a byte-exact resume point.
//!
//! Persistence is best-effort: corrupt or unavailable storage degrades to an
//! empty ledger and failures are logged, never surfaced to the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::KeyValueStore;

/// Storage key the ledger persists under.
pub const HISTORY_KEY: &str = "download_history";

/// Maximum number of records retained, oldest evicted first.
pub const DEFAULT_CAPACITY: usize = 10;

/// Terminal and in-flight states a recorded download can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    /// Whether this status marks a download a user could pick back up.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Paused | Self::Cancelled)
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Unique record id; re-recording the same id replaces the entry.
    pub id: String,
    /// Release version of the artifact, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Artifact filename.
    pub filename: String,
    /// Artifact size in bytes.
    pub size: u64,
    /// Bytes downloaded when the record was written.
    pub downloaded_bytes: u64,
    /// Total expected bytes.
    pub total_bytes: u64,
    /// Status at record time.
    pub status: DownloadStatus,
    /// ISO-8601 timestamp of the record.
    pub timestamp_iso: String,
    /// Source URL.
    pub url: String,
    /// Indices of chunks that had completed; advisory resume hint only.
    #[serde(default)]
    pub completed_chunk_indices: Vec<u32>,
}

/// Capacity-bounded download history over a key-value store.
#[derive(Clone)]
pub struct HistoryLedger {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
}

impl HistoryLedger {
    /// Create a ledger with the default 10-entry capacity.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capacity(store, DEFAULT_CAPACITY)
    }

    /// Create a ledger with a custom capacity (minimum 1).
    pub fn with_capacity(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    /// Record a download start or status change.
    ///
    /// An existing record with the same id is replaced and moved to the
    /// front; the oldest record is evicted once the capacity is exceeded.
    pub async fn record(&self, entry: HistoryRecord) {
        let mut entries = self.load().await;
        entries.retain(|e| e.id != entry.id);
        entries.insert(0, entry);
        entries.truncate(self.capacity);

        let bytes = match serde_json::to_vec(&entries) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode download history");
                return;
            }
        };
        if let Err(err) = self.store.set(HISTORY_KEY, bytes).await {
            warn!(error = %err, "failed to persist download history");
        }
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<HistoryRecord> {
        self.load().await
    }

    /// Records a user could resume: paused or cancelled downloads.
    pub async fn incomplete(&self) -> Vec<HistoryRecord> {
        self.load()
            .await
            .into_iter()
            .filter(|e| e.status.is_incomplete())
            .collect()
    }

    async fn load(&self) -> Vec<HistoryRecord> {
        match self.store.get(HISTORY_KEY).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(error = %err, "corrupt download history, starting empty");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, "failed to read download history");
                Vec::new()
            }
        }
    }
}
