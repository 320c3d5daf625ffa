//! Configuration for a download.

use std::time::Duration;

use crate::digest::DigestAlgorithm;
use crate::local::WriteMode;

/// Default chunk size (16 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Default number of concurrent fetches.
pub const DEFAULT_WORKERS: usize = crate::fetch::DEFAULT_WORKERS;

/// Default retry budget per part.
pub const DEFAULT_PART_RETRIES: u32 = 3;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = crate::fetch::DEFAULT_REQUEST_TIMEOUT;

/// Objects larger than this fetch their first chunk alone when running in a
/// worker context.
pub const SEQUENTIAL_FIRST_THRESHOLD: u64 = 128 * 1024;

/// Configuration for a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Maximum bytes per ranged read.
    pub chunk_size: u64,

    /// Maximum concurrent fetches.
    pub workers: usize,

    /// How an existing destination file is treated.
    pub write_mode: WriteMode,

    /// Attempts each part may fail before the download gives up.
    pub part_retries: u32,

    /// Timeout for each ranged read.
    pub request_timeout: Duration,

    /// Whether to report progress.
    pub show_progress: bool,

    /// Whether we run inside a batch worker.
    ///
    /// Workers fetch the first chunk of a fresh large download on its own
    /// before fanning out.
    pub worker_context: bool,

    /// Algorithm of the digests in part metadata.
    pub digest_algorithm: DigestAlgorithm,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            write_mode: WriteMode::Resume,
            part_retries: DEFAULT_PART_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            show_progress: false,
            worker_context: false,
            digest_algorithm: DigestAlgorithm::Md5,
        }
    }
}

impl DownloadConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size in bytes.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the number of concurrent fetches.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set how an existing destination file is treated.
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Set the retry budget per part.
    pub fn with_part_retries(mut self, retries: u32) -> Self {
        self.part_retries = retries;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enable or disable progress reporting.
    pub fn with_show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Mark the download as running inside a batch worker.
    pub fn with_worker_context(mut self, worker: bool) -> Self {
        self.worker_context = worker;
        self
    }

    /// Set the digest algorithm used for part metadata.
    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DownloadConfig::default();
        assert_eq!(config.chunk_size, 16 * 1024 * 1024);
        assert_eq!(config.workers, 4);
        assert_eq!(config.write_mode, WriteMode::Resume);
        assert_eq!(config.part_retries, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(600));
        assert!(!config.show_progress);
        assert!(!config.worker_context);
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Md5);
    }

    #[test]
    fn test_builder_pattern() {
        let config = DownloadConfig::new()
            .with_chunk_size(1024)
            .with_workers(16)
            .with_write_mode(WriteMode::Append)
            .with_part_retries(5)
            .with_request_timeout(Duration::from_secs(30))
            .with_show_progress(true)
            .with_worker_context(true)
            .with_digest_algorithm(DigestAlgorithm::Sha256);

        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.workers, 16);
        assert_eq!(config.write_mode, WriteMode::Append);
        assert_eq!(config.part_retries, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.show_progress);
        assert!(config.worker_context);
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha256);
    }
}
