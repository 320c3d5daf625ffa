//! Verification of partially downloaded files.
//!
//! Before continuing a download into an existing file, the file is walked
//! part by part and each part is hashed against its expected digest. The
//! longest verified prefix is kept; everything after it is truncated and
//! fetched again.

use std::io::SeekFrom;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::digest::{digests_match, DigestAlgorithm};
use crate::error::{DownloadError, DownloadResult};
use crate::local::LocalFile;
use crate::plan::{ChunkPlan, Part, PartId, PartState};
use crate::progress::{ProgressAction, ProgressSink, ProgressUpdate};

/// Size of each verification read.
pub const VERIFY_READ_SIZE: usize = 1024 * 1024;

/// Where a resumed download continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    /// Byte offset of the first unverified byte; the file is truncated here.
    pub offset: u64,
    /// Parts that were verified, in order.
    pub verified: Vec<PartId>,
    /// Parts that still have to be fetched, in order.
    pub pending: Vec<PartId>,
}

impl ResumePoint {
    /// Whether any existing bytes were kept.
    pub fn resumed(&self) -> bool {
        !self.verified.is_empty()
    }
}

/// Why the verification scan stopped at a part.
#[derive(Debug)]
enum ScanStop {
    NoDigest,
    Truncated { have: u64 },
    Mismatch { expected: String, actual: String },
    Read(std::io::Error),
}

impl std::fmt::Display for ScanStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDigest => f.write_str("part has no digest"),
            Self::Truncated { have } => write!(f, "local data is truncated after {} bytes", have),
            Self::Mismatch { expected, actual } => {
                write!(f, "checksum mismatch (expected {}, got {})", expected, actual)
            }
            Self::Read(e) => write!(f, "read failed: {}", e),
        }
    }
}

/// Verifies the existing prefix of a destination file.
#[derive(Debug, Clone)]
pub struct ResumeVerifier {
    algorithm: DigestAlgorithm,
    read_size: usize,
}

impl ResumeVerifier {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            read_size: VERIFY_READ_SIZE,
        }
    }

    /// Use a different read size (at least one byte).
    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    /// Verify `pending` parts in order against the start of `file`.
    ///
    /// The scan stops at the first part that is short, unreadable, has no
    /// digest, or whose digest disagrees. None of these are errors. The
    /// file is truncated to the end of the last verified part and the
    /// cursor left there; verified parts are marked in `plan`.
    ///
    /// # Errors
    ///
    /// Only failures to reposition or truncate the file are reported.
    pub async fn verify(
        &self,
        file: &mut LocalFile,
        plan: &mut ChunkPlan,
        pending: &[PartId],
        progress: &dyn ProgressSink,
        label: &str,
    ) -> DownloadResult<ResumePoint> {
        let path = file.path().to_path_buf();
        let write_error = |source| DownloadError::WriteFailed {
            path: path.clone(),
            source,
        };

        let handle = file.file_mut();
        handle.seek(SeekFrom::Start(0)).await.map_err(write_error)?;

        let mut offset = 0u64;
        let mut verified = Vec::new();
        let mut buffer = vec![0u8; self.read_size];

        for id in pending {
            let Some(part) = plan.part(*id).cloned() else {
                break;
            };

            if let Err(stop) = self.verify_part(handle, &part, &mut buffer).await {
                debug!(part = %part.id, offset = part.offset, reason = %stop, "Stopped verifying local data");
                break;
            }

            offset = part.end();
            verified.push(part.id);
            plan.set_state(part.id, PartState::Verified);
            progress.update(&ProgressUpdate {
                action: ProgressAction::Verified,
                bytes_done: offset,
                total: Some(plan.total_size()),
                label: label.to_string(),
            });
        }

        handle.seek(SeekFrom::Start(offset)).await.map_err(write_error)?;
        handle.set_len(offset).await.map_err(write_error)?;

        let remaining: Vec<PartId> = pending[verified.len()..].to_vec();
        if !verified.is_empty() {
            progress.update(&ProgressUpdate {
                action: ProgressAction::ResumingAt,
                bytes_done: offset,
                total: Some(plan.total_size()),
                label: label.to_string(),
            });
        }

        debug!(
            verified = verified.len(),
            pending = remaining.len(),
            offset,
            "Verified downloaded parts"
        );

        Ok(ResumePoint {
            offset,
            verified,
            pending: remaining,
        })
    }

    async fn verify_part(
        &self,
        file: &mut File,
        part: &Part,
        buffer: &mut [u8],
    ) -> Result<(), ScanStop> {
        let expected = part.digest.as_deref().ok_or(ScanStop::NoDigest)?;

        let mut hasher = self.algorithm.hasher();
        let mut remaining = part.size;
        while remaining > 0 {
            let want = remaining.min(buffer.len() as u64) as usize;
            let got = read_full(file, &mut buffer[..want])
                .await
                .map_err(ScanStop::Read)?;
            if got < want {
                return Err(ScanStop::Truncated {
                    have: part.size - remaining + got as u64,
                });
            }
            hasher.update(&buffer[..got]);
            remaining -= got as u64;
        }

        let actual = hasher.finalize_hex();
        if digests_match(expected, &actual) {
            Ok(())
        } else {
            Err(ScanStop::Mismatch {
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

/// Read until `buf` is full or the file ends.
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_bytes;
    use crate::local::WriteMode;
    use crate::plan::{FileStatus, PartMeta, PartTable};
    use crate::progress::NoProgress;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressUpdate>>);

    impl ProgressSink for Recorder {
        fn update(&self, update: &ProgressUpdate) {
            self.0.lock().unwrap().push(update.clone());
        }
    }

    fn content() -> Vec<u8> {
        (0..300u32).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn three_part_plan(data: &[u8]) -> ChunkPlan {
        let table = PartTable::new()
            .with_part(1, PartMeta::new(100, digest_bytes(DigestAlgorithm::Md5, &data[0..100])))
            .with_part(2, PartMeta::new(100, digest_bytes(DigestAlgorithm::Md5, &data[100..200])))
            .with_part(3, PartMeta::new(100, digest_bytes(DigestAlgorithm::Md5, &data[200..300])));
        ChunkPlan::new(&FileStatus::new(300), Some(&table), 64).unwrap()
    }

    async fn verify_file(existing: &[u8], plan: &mut ChunkPlan) -> (ResumePoint, Vec<u8>) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("partial");
        std::fs::write(&path, existing).unwrap();

        let mut file = LocalFile::open(&path, WriteMode::Resume).await.unwrap();
        let ids = plan.part_ids();
        let point = ResumeVerifier::new(DigestAlgorithm::Md5)
            .with_read_size(33)
            .verify(&mut file, plan, &ids, &NoProgress, "partial")
            .await
            .unwrap();
        drop(file);

        (point, std::fs::read(&path).unwrap())
    }

    #[tokio::test]
    async fn test_partial_file_resumes_after_verified_parts() {
        let data = content();
        let mut plan = three_part_plan(&data);

        // Two whole parts plus a few bytes of the third.
        let (point, on_disk) = verify_file(&data[..210], &mut plan).await;

        assert_eq!(point.offset, 200);
        assert_eq!(point.verified, vec![PartId::new(1), PartId::new(2)]);
        assert_eq!(point.pending, vec![PartId::new(3)]);
        assert_eq!(on_disk, &data[..200]);
        assert_eq!(plan.part(PartId::new(2)).unwrap().state, PartState::Verified);
        assert_eq!(plan.part(PartId::new(3)).unwrap().state, PartState::Pending);
    }

    #[tokio::test]
    async fn test_corrupt_part_truncates_at_previous_boundary() {
        let data = content();
        let mut plan = three_part_plan(&data);

        let mut corrupted = data.clone();
        corrupted[150] ^= 0xff;
        let (point, on_disk) = verify_file(&corrupted, &mut plan).await;

        assert_eq!(point.offset, 100);
        assert_eq!(point.pending, vec![PartId::new(2), PartId::new(3)]);
        assert_eq!(on_disk.len(), 100);
    }

    #[tokio::test]
    async fn test_complete_file_has_nothing_pending() {
        let data = content();
        let mut plan = three_part_plan(&data);

        let (point, on_disk) = verify_file(&data, &mut plan).await;

        assert_eq!(point.offset, 300);
        assert!(point.pending.is_empty());
        assert_eq!(on_disk, data);
    }

    #[tokio::test]
    async fn test_part_without_digest_stops_scan() {
        let data = content();
        let table = PartTable::new()
            .with_part(1, PartMeta::unverified(100))
            .with_part(2, PartMeta::new(200, digest_bytes(DigestAlgorithm::Md5, &data[100..])));
        let mut plan = ChunkPlan::new(&FileStatus::new(300), Some(&table), 64).unwrap();

        let (point, on_disk) = verify_file(&data, &mut plan).await;

        assert!(!point.resumed());
        assert_eq!(point.offset, 0);
        assert_eq!(point.pending.len(), 2);
        assert!(on_disk.is_empty());
    }

    #[tokio::test]
    async fn test_progress_reports_verified_and_resume_point() {
        let data = content();
        let mut plan = three_part_plan(&data);

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("partial");
        std::fs::write(&path, &data[..100]).unwrap();
        let mut file = LocalFile::open(&path, WriteMode::Resume).await.unwrap();

        let recorder = Recorder::default();
        let ids = plan.part_ids();
        ResumeVerifier::new(DigestAlgorithm::Md5)
            .verify(&mut file, &mut plan, &ids, &recorder, "partial")
            .await
            .unwrap();

        let updates = recorder.0.lock().unwrap();
        let actions: Vec<_> = updates.iter().map(|u| (u.action, u.bytes_done)).collect();
        assert_eq!(
            actions,
            vec![(ProgressAction::Verified, 100), (ProgressAction::ResumingAt, 100)]
        );
    }
}
