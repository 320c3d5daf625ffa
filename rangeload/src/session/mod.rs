//! A single download attempt.
//!
//! ```text
//! Init ──► Planned ──► Resumed? ──► Fetching ──► Verify ──► Complete
//!                                      │            │
//!                                      └────────────┴──► FailedRetryable
//!                                                    └──► FailedFatal
//! ```
//!
//! One coordinating task drains the fetcher's ordered stream, writes every
//! chunk to the destination and feeds it to the integrity checker. The file
//! is flushed and synced however the attempt ends.

mod retry;

pub use retry::RetryBudget;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DownloadConfig, SEQUENTIAL_FIRST_THRESHOLD};
use crate::error::{DownloadError, DownloadResult};
use crate::fetch::ParallelFetcher;
use crate::integrity::{IntegrityChecker, IntegrityWarning};
use crate::local::{destination_path, LocalFile, WriteMode};
use crate::plan::{ChunkPlan, ObjectState, PartId, PartState};
use crate::progress::{ProgressAction, ProgressSink, ProgressUpdate};
use crate::remote::RemoteObject;
use crate::resume::{ResumePoint, ResumeVerifier};

/// Where a download is written: `root/sub_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Destination directory, created if missing.
    pub root: PathBuf,
    /// Path of the file relative to `root`.
    pub sub_path: String,
}

impl DownloadTarget {
    pub fn new(root: impl Into<PathBuf>, sub_path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            sub_path: sub_path.into(),
        }
    }
}

/// Lifecycle of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Planned,
    Resumed,
    Fetching,
    Verify,
    Complete,
    FailedRetryable,
    FailedFatal,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Planned => "planned",
            Self::Resumed => "resumed",
            Self::Fetching => "fetching",
            Self::Verify => "verify",
            Self::Complete => "complete",
            Self::FailedRetryable => "failed_retryable",
            Self::FailedFatal => "failed_fatal",
        };
        f.write_str(name)
    }
}

/// Result of a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    /// Destination file.
    pub path: PathBuf,
    /// Bytes fetched and written by this attempt.
    pub bytes_transferred: u64,
    /// Offset at which fetching started after resume verification.
    pub resumed_from: u64,
    /// Number of parts in the object.
    pub parts: usize,
    /// Integrity warnings raised by this attempt.
    pub warnings: Vec<IntegrityWarning>,
}

/// How an attempt ended without a fatal error.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The object is fully downloaded and verified.
    Complete(AttemptReport),
    /// A retryable failure with budget left; start a fresh attempt.
    Retry {
        part: PartId,
        remaining: u32,
        error: DownloadError,
        bytes_transferred: u64,
        resumed_from: u64,
    },
}

/// Progress of the fetch loop, kept for reporting on every exit path.
#[derive(Debug, Default)]
struct FetchTally {
    bytes: u64,
    resumed_from: u64,
    warnings: Vec<IntegrityWarning>,
}

/// One attempt at downloading an object.
pub struct DownloadSession<'a> {
    object: Arc<dyn RemoteObject>,
    target: &'a DownloadTarget,
    config: &'a DownloadConfig,
    fetcher: &'a ParallelFetcher,
    progress: &'a dyn ProgressSink,
    cancel: CancellationToken,
    state: SessionState,
}

impl<'a> DownloadSession<'a> {
    pub fn new(
        object: Arc<dyn RemoteObject>,
        target: &'a DownloadTarget,
        config: &'a DownloadConfig,
        fetcher: &'a ParallelFetcher,
        progress: &'a dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            object,
            target,
            config,
            fetcher,
            progress,
            cancel,
            state: SessionState::Init,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(object = self.object.id(), from = %self.state, to = %next, "Session state");
        self.state = next;
    }

    /// Run the attempt.
    ///
    /// Retryable failures are charged to the failing part in `budget`. While
    /// that part has budget left the attempt ends with
    /// [`AttemptOutcome::Retry`]; otherwise the error is returned.
    pub async fn run(mut self, budget: &mut RetryBudget) -> DownloadResult<AttemptOutcome> {
        let mut tally = FetchTally::default();
        let result = self.attempt(&mut tally).await;

        match result {
            Ok(report) => {
                self.transition(SessionState::Complete);
                Ok(AttemptOutcome::Complete(report))
            }
            Err(error) => match error.part().filter(|_| error.is_retryable()) {
                Some(part) => {
                    let remaining = budget.consume(part);
                    if remaining > 0 {
                        self.transition(SessionState::FailedRetryable);
                        Ok(AttemptOutcome::Retry {
                            part,
                            remaining,
                            error,
                            bytes_transferred: tally.bytes,
                            resumed_from: tally.resumed_from,
                        })
                    } else {
                        self.transition(SessionState::FailedFatal);
                        Err(error)
                    }
                }
                None => {
                    self.transition(SessionState::FailedFatal);
                    Err(error)
                }
            },
        }
    }

    async fn attempt(&mut self, tally: &mut FetchTally) -> DownloadResult<AttemptReport> {
        let object_id = self.object.id().to_string();

        // Local problems surface before any network traffic.
        let path = destination_path(&self.target.root, &self.target.sub_path).await?;

        let description = self.object.describe().await?;
        if description.status.state != ObjectState::Closed {
            warn!(
                object = %object_id,
                state = ?description.status.state,
                "Object is not closed, downloading its current contents"
            );
        }

        let mut plan = ChunkPlan::new(
            &description.status,
            description.parts.as_ref(),
            self.config.chunk_size,
        )?;
        self.transition(SessionState::Planned);

        let label = self.target.sub_path.clone();
        let mut file = LocalFile::open(&path, self.config.write_mode).await?;

        let all_parts = plan.part_ids();
        let resume = if self.config.write_mode == WriteMode::Resume && file.existed() {
            let point = ResumeVerifier::new(self.config.digest_algorithm)
                .verify(&mut file, &mut plan, &all_parts, self.progress, &label)
                .await;
            match point {
                Ok(point) => point,
                Err(e) => {
                    sync_quietly(&mut file).await;
                    return Err(e);
                }
            }
        } else {
            ResumePoint {
                offset: 0,
                verified: Vec::new(),
                pending: all_parts.clone(),
            }
        };
        if resume.resumed() {
            self.transition(SessionState::Resumed);
        }
        tally.resumed_from = resume.offset;

        info!(
            object = %object_id,
            path = %path.display(),
            size = plan.total_size(),
            parts = plan.parts().len(),
            pending = resume.pending.len(),
            offset = resume.offset,
            "Starting download attempt"
        );

        let result = self
            .fetch_into(&mut file, &mut plan, &resume, &label, tally)
            .await;

        // Flush and sync on every path; the first error wins.
        let synced = file.sync().await;
        result?;
        synced?;

        self.progress.update(&ProgressUpdate {
            action: ProgressAction::Completed,
            bytes_done: resume.offset + tally.bytes,
            total: Some(plan.total_size()),
            label,
        });

        info!(
            object = %object_id,
            bytes = tally.bytes,
            resumed_from = resume.offset,
            "Download attempt complete"
        );

        Ok(AttemptReport {
            path,
            bytes_transferred: tally.bytes,
            resumed_from: resume.offset,
            parts: plan.parts().len(),
            warnings: std::mem::take(&mut tally.warnings),
        })
    }

    async fn fetch_into(
        &mut self,
        file: &mut LocalFile,
        plan: &mut ChunkPlan,
        resume: &ResumePoint,
        label: &str,
        tally: &mut FetchTally,
    ) -> DownloadResult<()> {
        let sequential_first = self.config.worker_context
            && plan.total_size() > SEQUENTIAL_FIRST_THRESHOLD
            && resume.offset == 0;

        // Stops in-flight fetches whenever this function returns.
        let fetch_token = self.cancel.child_token();
        let _stop_fetches = fetch_token.clone().drop_guard();

        let fetcher = self.fetcher.clone().with_sequential_first(sequential_first);
        let mut chunks = fetcher.fetch(
            Arc::clone(&self.object),
            &self.target.sub_path,
            plan,
            plan.chunk_requests(&resume.pending),
            fetch_token,
        );

        let mut checker = IntegrityChecker::new(
            self.object.id(),
            plan,
            &resume.pending,
            self.config.digest_algorithm,
        );
        for id in &resume.pending {
            plan.set_state(*id, PartState::Fetching);
        }
        self.transition(SessionState::Fetching);

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;

            file.write_chunk(&chunk.bytes).await?;
            tally.bytes += chunk.bytes.len() as u64;
            self.progress.update(&ProgressUpdate {
                action: ProgressAction::Downloaded,
                bytes_done: resume.offset + tally.bytes,
                total: Some(plan.total_size()),
                label: label.to_string(),
            });

            for part in checker.observe(&chunk)? {
                plan.set_state(part, PartState::Complete);
                debug!(part = %part, "Part verified");
            }
        }

        self.transition(SessionState::Verify);
        let summary = checker.finish()?;
        for part in &summary.completed {
            plan.set_state(*part, PartState::Complete);
        }
        tally.warnings = summary.warnings;
        Ok(())
    }
}

impl fmt::Debug for DownloadSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadSession")
            .field("object", &self.object.id())
            .field("target", &self.target)
            .field("state", &self.state)
            .finish()
    }
}

async fn sync_quietly(file: &mut LocalFile) {
    if let Err(e) = file.sync().await {
        debug!(error = %e, "Failed to sync destination");
    }
}
