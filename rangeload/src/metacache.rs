//! Short-TTL cache of remote release metadata.
//!
//! Avoids refetching the release listing on every visit. Entries are stamped
//! with their fetch time; a read past the TTL behaves as a miss and removes
//! the stale entry. Corrupt stored JSON also behaves as a miss - the cache
//! never raises.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::KeyValueStore;

/// Storage key the release metadata is cached under.
pub const RELEASES_KEY: &str = "releases_cache";

/// Default time-to-live for a cached entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct CachedEnvelope {
    payload: serde_json::Value,
    fetched_at_epoch_ms: u64,
}

/// TTL cache for release metadata over a key-value store.
#[derive(Clone)]
pub struct MetadataCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl MetadataCache {
    /// Create a cache with the default 15 minute TTL.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TTL)
    }

    /// Create a cache with a custom TTL.
    pub fn with_ttl(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The cached payload, or `None` when absent, stale, or unreadable.
    pub async fn get(&self) -> Option<serde_json::Value> {
        self.get_at(now_epoch_ms()).await
    }

    /// Cache a payload stamped with the current time. Best-effort.
    pub async fn set(&self, payload: serde_json::Value) {
        self.set_at(payload, now_epoch_ms()).await;
    }

    /// Clock-injected variant of [`get`](Self::get); `now_ms` is epoch
    /// milliseconds.
    pub async fn get_at(&self, now_ms: u64) -> Option<serde_json::Value> {
        let bytes = match self.store.get(RELEASES_KEY).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "failed to read metadata cache");
                return None;
            }
        };

        let envelope: CachedEnvelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "corrupt metadata cache entry, treating as absent");
                return None;
            }
        };

        let age_ms = now_ms.saturating_sub(envelope.fetched_at_epoch_ms);
        if age_ms > self.ttl.as_millis() as u64 {
            if let Err(err) = self.store.remove(RELEASES_KEY).await {
                warn!(error = %err, "failed to clear stale metadata cache entry");
            }
            return None;
        }

        Some(envelope.payload)
    }

    /// Clock-injected variant of [`set`](Self::set).
    pub async fn set_at(&self, payload: serde_json::Value, now_ms: u64) {
        let envelope = CachedEnvelope {
            payload,
            fetched_at_epoch_ms: now_ms,
        };
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode metadata cache entry");
                return;
            }
        };
        if let Err(err) = self.store.set(RELEASES_KEY, bytes).await {
            warn!(error = %err, "failed to persist metadata cache entry");
        }
    }
}

fn now_epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
