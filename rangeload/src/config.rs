//! Configuration for the download engine.

use std::time::Duration;

/// Default chunk size for range requests (5 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of concurrently in-flight chunk fetches.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default retry budget per chunk.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Default minimum interval between speed samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for a download session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of each byte-range chunk. The final chunk may be shorter.
    pub chunk_size: u64,

    /// Maximum number of chunk fetches in flight at once.
    ///
    /// A value of `1` recovers fully sequential downloading.
    pub max_concurrent: usize,

    /// How many attempts a chunk gets before its failure is terminal.
    pub max_retries: u32,

    /// Base delay for exponential backoff between retry attempts.
    pub base_delay: Duration,

    /// Minimum interval between recomputed speed/ETA samples.
    pub sample_interval: Duration,

    /// Timeout applied to each HTTP request.
    pub http_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the maximum number of concurrent chunk fetches.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the per-chunk retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base backoff delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the minimum interval between progress samples.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_millis(2000));
        assert_eq!(config.sample_interval, Duration::from_millis(200));
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::new()
            .with_chunk_size(1024)
            .with_max_concurrent(8)
            .with_max_retries(5)
            .with_base_delay(Duration::from_millis(100))
            .with_sample_interval(Duration::from_millis(50))
            .with_http_timeout(Duration::from_secs(60));

        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay, Duration::from_millis(100));
        assert_eq!(config.sample_interval, Duration::from_millis(50));
        assert_eq!(config.http_timeout, Duration::from_secs(60));
    }
}
