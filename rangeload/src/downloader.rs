//! Outer retry loop.
//!
//! [`Downloader`] runs fresh [`DownloadSession`]s until one completes or a
//! failure is fatal. There is no cap on the number of attempts beyond the
//! per-part budgets in [`RetryBudget`], which live for one `download` call.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DownloadConfig;
use crate::error::{DownloadError, DownloadResult};
use crate::fetch::ParallelFetcher;
use crate::integrity::IntegrityWarning;
use crate::local::{destination_path, existing_len, truncate_to, WriteMode};
use crate::progress::{NoProgress, ProgressSink, SharedProgress};
use crate::remote::{ObjectRef, ObjectResolver, RangeReader};
use crate::session::{AttemptOutcome, DownloadSession, DownloadTarget, RetryBudget};

/// Summary of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Destination file.
    pub path: PathBuf,
    /// Bytes fetched across all attempts.
    pub bytes_transferred: u64,
    /// Bytes of an existing file kept by the first attempt.
    pub resumed_from: u64,
    /// Number of attempts made.
    pub attempts: u32,
    /// Number of parts in the object.
    pub parts: usize,
    /// Integrity warnings, one per affected part.
    pub warnings: Vec<IntegrityWarning>,
}

/// Downloads remote objects with resume, verification and retries.
pub struct Downloader {
    config: DownloadConfig,
    fetcher: ParallelFetcher,
    resolver: Option<Arc<dyn ObjectResolver>>,
    progress: SharedProgress,
    cancel: CancellationToken,
}

impl Downloader {
    /// Create a downloader reading through `reader`.
    pub fn new(config: DownloadConfig, reader: Arc<dyn RangeReader>) -> Self {
        let fetcher = ParallelFetcher::new(reader)
            .with_workers(config.workers)
            .with_timeout(config.request_timeout);

        Self {
            config,
            fetcher,
            resolver: None,
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    /// Resolve raw object ids through `resolver`.
    pub fn with_resolver(mut self, resolver: Arc<dyn ObjectResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Report progress to `sink` when the configuration enables progress.
    pub fn with_progress(mut self, sink: SharedProgress) -> Self {
        self.progress = sink;
        self
    }

    /// Abort downloads when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download `object` to `target`.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the retryable error that
    /// exhausted its part's budget. Cancellation returns
    /// [`DownloadError::Cancelled`].
    pub async fn download(
        &self,
        object: impl Into<ObjectRef>,
        target: &DownloadTarget,
    ) -> DownloadResult<DownloadReport> {
        let object = object.into();
        let progress: &dyn ProgressSink = if self.config.show_progress {
            self.progress.as_ref()
        } else {
            &NoProgress
        };

        let result = self.run_attempts(&object, target, progress).await;
        progress.finish();
        result
    }

    async fn run_attempts(
        &self,
        object: &ObjectRef,
        target: &DownloadTarget,
        progress: &dyn ProgressSink,
    ) -> DownloadResult<DownloadReport> {
        let mut budget = RetryBudget::new(self.config.part_retries);
        let mut attempts = 0u32;
        let mut bytes_transferred = 0u64;
        let mut resumed_from = None;
        let mut warnings: Vec<IntegrityWarning> = Vec::new();

        // Appended bytes are never re-verified, so a retry has to start from
        // the length the file had before the first attempt.
        let append_base = match self.config.write_mode {
            WriteMode::Append => {
                let path = destination_path(&target.root, &target.sub_path).await?;
                let len = existing_len(&path).await?;
                Some((path, len))
            }
            WriteMode::Resume => None,
        };

        loop {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            attempts += 1;

            let handle = object.resolve(self.resolver.as_deref()).await?;
            let session = DownloadSession::new(
                handle,
                target,
                &self.config,
                &self.fetcher,
                progress,
                self.cancel.clone(),
            );

            match session.run(&mut budget).await? {
                AttemptOutcome::Complete(report) => {
                    bytes_transferred += report.bytes_transferred;
                    resumed_from.get_or_insert(report.resumed_from);
                    for warning in merge_warnings(&mut warnings, report.warnings) {
                        warn!(object = object.label(), "{}", warning);
                    }

                    info!(
                        object = object.label(),
                        path = %report.path.display(),
                        attempts,
                        bytes = bytes_transferred,
                        "Download complete"
                    );

                    return Ok(DownloadReport {
                        path: report.path,
                        bytes_transferred,
                        resumed_from: resumed_from.unwrap_or(0),
                        attempts,
                        parts: report.parts,
                        warnings,
                    });
                }
                AttemptOutcome::Retry {
                    part,
                    remaining,
                    error,
                    bytes_transferred: attempt_bytes,
                    resumed_from: attempt_resumed_from,
                } => {
                    bytes_transferred += attempt_bytes;
                    resumed_from.get_or_insert(attempt_resumed_from);
                    warn!(
                        object = object.label(),
                        part = %part,
                        remaining,
                        error = %error,
                        "Retrying download ({} tries remain for part {})",
                        remaining,
                        part
                    );

                    if let Some((path, len)) = &append_base {
                        truncate_to(path, *len).await?;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher)
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

/// Add warnings not seen yet and return the newly added ones.
fn merge_warnings(
    into: &mut Vec<IntegrityWarning>,
    new: Vec<IntegrityWarning>,
) -> Vec<IntegrityWarning> {
    let mut added = Vec::new();
    for warning in new {
        if !into.contains(&warning) {
            into.push(warning.clone());
            added.push(warning);
        }
    }
    added
}
