//! Rangeload - resilient chunked HTTP downloads
//!
//! This library fetches large binary artifacts by splitting them into
//! byte-range chunks, fetching chunks with bounded parallelism, retrying
//! transient failures with exponential backoff, and reassembling the chunks
//! into the original artifact, with live speed/ETA progress reporting along
//! the way.
//!
//! # Architecture
//!
//! ```text
//! DownloadSession (state machine, callbacks)
//!         │
//!         ├── plan       chunk plan over [0, total_size)
//!         ├── scheduler  bounded pool of in-flight fetches
//!         │       └── fetch    one Range request, retry + backoff
//!         ├── progress   rolling speed and ETA estimation
//!         └── assemble   index-order reassembly
//!
//! HistoryLedger / MetadataCache (storage-backed, best-effort)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rangeload::{DownloadSession, DownloadTarget, EngineConfig};
//!
//! let target = DownloadTarget::new(url, "installer.pkg", total_size);
//! let session = DownloadSession::new(target, EngineConfig::default())
//!     .on_progress(|sample| println!("{:.1}%", sample.percentage));
//!
//! let controls = session.controls();   // pause / resume / cancel
//! let artifact = session.run().await?;
//! ```

pub mod assemble;
pub mod config;
pub mod error;
pub mod fetch;
pub mod history;
pub mod metacache;
pub mod plan;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod storage;

pub use config::EngineConfig;
pub use error::{DownloadError, DownloadResult};
pub use fetch::{ChunkFetch, FetchControls, FetchedChunk, HttpChunkFetcher, ProbeInfo};
pub use history::{DownloadStatus, HistoryLedger, HistoryRecord};
pub use metacache::MetadataCache;
pub use plan::{plan, Chunk, DownloadTarget};
pub use progress::{CompletionInfo, ProgressSample, SpeedEstimator};
pub use scheduler::ConcurrencyScheduler;
pub use session::{DownloadSession, SessionControls, SessionState};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, StorageError};
