//! Per-part integrity checking over the ordered chunk stream.
//!
//! The checker keeps a rolling digest and byte count for the part currently
//! arriving. When the stream moves on to another part, the previous one is
//! finalized: its byte count must equal the declared size and, when the
//! metadata carries a digest, the digests must agree.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, trace};

use crate::digest::{digests_match, DigestAlgorithm, PartHasher};
use crate::error::{DownloadError, DownloadResult};
use crate::fetch::ChunkResult;
use crate::plan::{ChunkPlan, PartId};

/// A condition worth reporting that does not fail the download.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntegrityWarning {
    /// A part was accepted without a digest to check it against.
    MissingIntegrityMetadata { object: String, part: PartId },
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingIntegrityMetadata { object, part } => write!(
                f,
                "download of {} part {} is not being checked for integrity",
                object, part
            ),
        }
    }
}

/// Expected properties of one pending part.
#[derive(Debug, Clone)]
struct ExpectedPart {
    id: PartId,
    size: u64,
    digest: Option<String>,
}

/// The part whose bytes are currently arriving.
#[derive(Debug)]
struct ActivePart {
    expected: ExpectedPart,
    hasher: PartHasher,
    bytes: u64,
}

/// Outcome of a fully consumed stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegritySummary {
    /// Parts finalized successfully, in order.
    pub completed: Vec<PartId>,
    /// Warnings raised along the way.
    pub warnings: Vec<IntegrityWarning>,
}

/// Verifies parts as their chunks arrive in order.
///
/// Missing-digest warnings are collected in the [`IntegritySummary`]; the
/// [`Downloader`](crate::Downloader) logs each one once per download.
#[derive(Debug)]
pub struct IntegrityChecker {
    object: String,
    algorithm: DigestAlgorithm,
    upcoming: VecDeque<ExpectedPart>,
    active: Option<ActivePart>,
    summary: IntegritySummary,
}

impl IntegrityChecker {
    /// Create a checker expecting `pending` parts of `plan`, in order.
    pub fn new(
        object: impl Into<String>,
        plan: &ChunkPlan,
        pending: &[PartId],
        algorithm: DigestAlgorithm,
    ) -> Self {
        let upcoming = pending
            .iter()
            .filter_map(|id| plan.part(*id))
            .map(|part| ExpectedPart {
                id: part.id,
                size: part.size,
                digest: part.digest.clone(),
            })
            .collect();

        Self {
            object: object.into(),
            algorithm,
            upcoming,
            active: None,
            summary: IntegritySummary::default(),
        }
    }

    /// Part currently being received, if any.
    pub fn current_part(&self) -> Option<PartId> {
        self.active.as_ref().map(|active| active.expected.id)
    }

    /// Feed the next chunk of the stream.
    ///
    /// Returns the parts finalized by this chunk's arrival, which are the
    /// parts preceding it. The chunk's own bytes must already be written.
    pub fn observe(&mut self, chunk: &ChunkResult) -> DownloadResult<Vec<PartId>> {
        let mut finalized = Vec::new();

        if self.current_part() != Some(chunk.part) {
            if !self.upcoming.iter().any(|part| part.id == chunk.part) {
                return Err(DownloadError::InvalidLayout {
                    reason: format!(
                        "received data for part {} which is not pending",
                        chunk.part
                    ),
                });
            }

            if let Some(active) = self.active.take() {
                finalized.push(self.finalize(active)?);
            }

            while let Some(next) = self.upcoming.pop_front() {
                let active = ActivePart {
                    hasher: self.algorithm.hasher(),
                    bytes: 0,
                    expected: next,
                };
                if active.expected.id == chunk.part {
                    self.active = Some(active);
                    break;
                }
                // The stream skipped this part entirely.
                finalized.push(self.finalize(active)?);
            }
        }

        if let Some(active) = self.active.as_mut() {
            active.hasher.update(&chunk.bytes);
            active.bytes += chunk.bytes.len() as u64;
            trace!(part = %chunk.part, bytes = active.bytes, "Part progress");
        }

        Ok(finalized)
    }

    /// Finalize the last part and any pending parts the stream never reached.
    pub fn finish(mut self) -> DownloadResult<IntegritySummary> {
        if let Some(active) = self.active.take() {
            self.finalize(active)?;
        }
        while let Some(expected) = self.upcoming.pop_front() {
            let active = ActivePart {
                hasher: self.algorithm.hasher(),
                bytes: 0,
                expected,
            };
            self.finalize(active)?;
        }
        Ok(self.summary)
    }

    fn finalize(&mut self, active: ActivePart) -> DownloadResult<PartId> {
        let ActivePart {
            expected,
            hasher,
            bytes,
        } = active;

        if bytes != expected.size {
            return Err(DownloadError::PartLengthMismatch {
                object: self.object.clone(),
                part: expected.id,
                expected: expected.size,
                actual: bytes,
            });
        }

        match expected.digest.as_deref() {
            Some(digest) => {
                let actual = hasher.finalize_hex();
                if !digests_match(digest, &actual) {
                    return Err(DownloadError::ChecksumMismatch {
                        object: self.object.clone(),
                        part: expected.id,
                        expected: digest.to_string(),
                        actual,
                    });
                }
            }
            None => {
                let warning = IntegrityWarning::MissingIntegrityMetadata {
                    object: self.object.clone(),
                    part: expected.id,
                };
                debug!(object = %self.object, part = %expected.id, "Part has no digest");
                self.summary.warnings.push(warning);
            }
        }

        self.summary.completed.push(expected.id);
        Ok(expected.id)
    }
}
