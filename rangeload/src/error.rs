//! Error types for the download engine.
//!
//! Every failure of a download attempt is a [`DownloadError`]. Errors are
//! classified as retryable or fatal by [`DownloadError::is_retryable`]; the
//! outer retry loop only ever retries the retryable ones, and only while the
//! affected part still has budget left.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::plan::PartId;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors raised by a transport while resolving a byte range.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    /// The request could not be sent or the body could not be read.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The server answered with an unexpected status.
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The request did not finish within the configured timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// A ranged request was answered with the whole resource.
    #[error("server ignored range {start}-{end} for {url}")]
    RangeIgnored { url: String, start: u64, end: u64 },

    /// The first read of an indirect descriptor did not yield a usable URL.
    #[error("invalid storage location from {url}: {reason}")]
    InvalidLocation { url: String, reason: String },
}

/// Errors that can occur while downloading a remote object.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Part metadata is inconsistent with the object size.
    #[error("invalid part layout: {reason}")]
    InvalidLayout { reason: String },

    /// A local path component exists and is not a directory.
    #[error("destination location '{}' already exists and is not a directory", path.display())]
    DestinationConflict { path: PathBuf },

    /// A part did not receive exactly its declared number of bytes.
    #[error("unexpected part data size in {object} part {part} (expected {expected}, got {actual})")]
    PartLengthMismatch {
        object: String,
        part: PartId,
        expected: u64,
        actual: u64,
    },

    /// A part's computed digest disagrees with its metadata.
    #[error("checksum mismatch in {object} part {part} (expected {expected}, got {actual})")]
    ChecksumMismatch {
        object: String,
        part: PartId,
        expected: String,
        actual: String,
    },

    /// Fetching a chunk of a part failed.
    #[error("failed to fetch part {part}: {source}")]
    Transport {
        part: PartId,
        #[source]
        source: TransportError,
    },

    /// Object metadata could not be resolved or is unusable.
    #[error("metadata error for {object}: {reason}")]
    Metadata { object: String, reason: String },

    /// Failed to read a local file.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a local file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a local directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// The download was cancelled by the caller.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Whether a fresh attempt may succeed where this one failed.
    ///
    /// Integrity violations and transport failures are retryable; layout,
    /// destination, metadata, local I/O and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PartLengthMismatch { .. } | Self::ChecksumMismatch { .. } | Self::Transport { .. }
        )
    }

    /// The part a retryable error is charged against.
    pub fn part(&self) -> Option<PartId> {
        match self {
            Self::PartLengthMismatch { part, .. }
            | Self::ChecksumMismatch { part, .. }
            | Self::Transport { part, .. } => Some(*part),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_display() {
        let err = DownloadError::ChecksumMismatch {
            object: "object-1".to_string(),
            part: PartId::new(2),
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("checksum mismatch"));
        assert!(msg.contains("part 2"));
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn test_destination_conflict_display() {
        let err = DownloadError::DestinationConflict {
            path: PathBuf::from("/tmp/out"),
        };
        assert_eq!(
            err.to_string(),
            "destination location '/tmp/out' already exists and is not a directory"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let part = PartId::new(1);
        let transport = DownloadError::Transport {
            part,
            source: TransportError::Status {
                url: "http://a".to_string(),
                status: 503,
            },
        };
        let length = DownloadError::PartLengthMismatch {
            object: "o".to_string(),
            part,
            expected: 10,
            actual: 9,
        };

        assert!(transport.is_retryable());
        assert!(length.is_retryable());
        assert_eq!(transport.part(), Some(part));

        let layout = DownloadError::InvalidLayout {
            reason: "sizes".to_string(),
        };
        assert!(!layout.is_retryable());
        assert!(layout.part().is_none());
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_transport_error_source_chain() {
        use std::error::Error as _;

        let err = DownloadError::Transport {
            part: PartId::new(3),
            source: TransportError::Timeout {
                url: "http://a".to_string(),
                timeout_secs: 5,
            },
        };
        let source = err.source().expect("transport errors carry a source");
        assert!(source.to_string().contains("timed out after 5s"));
    }
}
