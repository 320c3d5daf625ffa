//! Concurrent chunk fetching.
//!
//! [`ParallelFetcher`] turns a lazy sequence of [`ChunkRequest`]s into an
//! ordered stream of [`ChunkResult`]s. Every request resolves a fresh fetch
//! descriptor and reads its byte range; indirect descriptors take a second
//! read against the storage URL returned by the first.

mod pool;

pub use pool::{ordered, TaskFailed};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{DownloadError, DownloadResult, TransportError};
use crate::plan::{ChunkPlan, ChunkRequest, ChunkRequests, PartId};
use crate::remote::{RangeRead, RangeReader, RemoteObject};

/// Default number of concurrent fetches.
pub const DEFAULT_WORKERS: usize = 4;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Bytes fetched for one chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResult {
    /// Part the bytes belong to.
    pub part: PartId,
    /// Absolute offset of the first byte.
    pub start: u64,
    /// The fetched bytes.
    pub bytes: Bytes,
}

/// Everything a worker needs to fetch one chunk.
struct FetchContext {
    object: Arc<dyn RemoteObject>,
    sub_path: String,
    reader: Arc<dyn RangeReader>,
    timeout: Duration,
}

/// Bounded concurrent fetcher with ordered results.
#[derive(Clone)]
pub struct ParallelFetcher {
    reader: Arc<dyn RangeReader>,
    workers: usize,
    timeout: Duration,
    sequential_first: bool,
}

impl ParallelFetcher {
    /// Create a fetcher reading through `reader`.
    pub fn new(reader: Arc<dyn RangeReader>) -> Self {
        Self {
            reader,
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            sequential_first: false,
        }
    }

    /// Maximum number of fetches in flight (at least 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Timeout applied to every ranged read.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the first request alone before concurrent dispatch begins.
    pub fn with_sequential_first(mut self, enabled: bool) -> Self {
        self.sequential_first = enabled;
        self
    }

    /// Maximum number of fetches in flight.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetch `requests`, yielding results in request order.
    ///
    /// Requests are pulled from the iterator only as worker slots free up.
    /// Cancelling `cancel` makes every in-flight and future fetch resolve to
    /// [`DownloadError::Cancelled`]; callers should cancel it whenever they
    /// stop draining the stream early.
    pub fn fetch(
        &self,
        object: Arc<dyn RemoteObject>,
        sub_path: &str,
        plan: &ChunkPlan,
        requests: ChunkRequests,
        cancel: CancellationToken,
    ) -> BoxStream<'static, DownloadResult<ChunkResult>> {
        let context = Arc::new(FetchContext {
            object,
            sub_path: sub_path.to_string(),
            reader: Arc::clone(&self.reader),
            timeout: self.timeout,
        });

        let layout = plan.clone();
        let requests = requests.map(move |request| {
            let use_range = layout.needs_range_header(&request);
            (request, use_range)
        });

        let task = move |(request, use_range): (ChunkRequest, bool)| {
            let context = Arc::clone(&context);
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(DownloadError::Cancelled),
                    result = fetch_chunk(&context, request, use_range) => {
                        result.map_err(|source| DownloadError::Transport {
                            part: request.part,
                            source,
                        })
                    }
                }
            }
        };

        ordered(requests, self.workers, self.sequential_first, task)
            .map(|result| match result {
                Ok(chunk) => chunk,
                Err(failed) => Err(DownloadError::Transport {
                    part: failed.item.0.part,
                    source: TransportError::Request {
                        url: String::new(),
                        reason: format!("fetch task failed: {}", failed.source),
                    },
                }),
            })
            .boxed()
    }
}

impl std::fmt::Debug for ParallelFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelFetcher")
            .field("workers", &self.workers)
            .field("timeout", &self.timeout)
            .field("sequential_first", &self.sequential_first)
            .finish()
    }
}

async fn fetch_chunk(
    context: &FetchContext,
    request: ChunkRequest,
    use_range: bool,
) -> Result<ChunkResult, TransportError> {
    let descriptor = context.object.fetch_descriptor(&context.sub_path).await?;

    let mut read = RangeRead {
        url: descriptor.url,
        headers: descriptor.headers,
        start: request.start,
        end: request.end,
        timeout: context.timeout,
        use_range,
    };

    if descriptor.indirect {
        let location = context.reader.read_range(read.clone()).await?;
        let storage_url = parse_location(&read.url, &location)?;
        trace!(part = %request.part, "Resolved storage location");
        read.url = storage_url;
    }

    let bytes = context.reader.read_range(read).await?;
    debug!(
        part = %request.part,
        start = request.start,
        end = request.end,
        bytes = bytes.len(),
        "Fetched chunk"
    );

    Ok(ChunkResult {
        part: request.part,
        start: request.start,
        bytes,
    })
}

/// Interpret the body of an indirect read as a storage URL.
fn parse_location(url: &str, body: &[u8]) -> Result<String, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidLocation {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let text = std::str::from_utf8(body).map_err(|_| invalid("body is not valid UTF-8"))?;
    let location = text.trim();
    if location.is_empty() {
        return Err(invalid("body is empty"));
    }
    if location.contains(char::is_whitespace) {
        return Err(invalid("body is not a single URL"));
    }
    Ok(location.to_string())
}
