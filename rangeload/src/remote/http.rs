//! HTTP implementations of the remote object traits.
//!
//! - [`HttpRangeReader`] issues ranged GET requests with `reqwest`
//! - [`HttpObject`] treats a single URL as a remote object
//! - [`HttpResolver`] resolves raw identifiers that are URLs

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use super::{
    BoxFuture, FetchDescriptor, ObjectDescription, ObjectResolver, RangeRead, RangeReader,
    RemoteObject,
};
use crate::error::{DownloadError, DownloadResult, TransportError};
use crate::plan::{FileStatus, PartTable};

/// Default timeout for metadata requests in seconds.
const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 30;

fn build_client(timeout: Duration) -> Result<Client, TransportError> {
    Client::builder()
        .connect_timeout(timeout)
        .build()
        .map_err(|e| TransportError::Request {
            url: String::new(),
            reason: format!("failed to create HTTP client: {}", e),
        })
}

fn map_request_error(url: &str, timeout: Duration, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Ranged reads over HTTP(S).
///
/// Sends `Range: bytes=start-end` when the request asks for it and accepts
/// `206 Partial Content`. A `200 OK` answer to a ranged request is only
/// accepted when its body is exactly the requested span.
#[derive(Debug, Clone)]
pub struct HttpRangeReader {
    client: Client,
}

impl HttpRangeReader {
    /// Create a reader with its own connection pool.
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECS))?,
        })
    }

    /// Create a reader sharing an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl RangeReader for HttpRangeReader {
    fn read_range(&self, request: RangeRead) -> BoxFuture<'_, Result<Bytes, TransportError>> {
        Box::pin(async move {
            let url = request.url.as_str();
            let mut builder = self.client.get(url).timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if request.use_range {
                builder = builder.header(RANGE, format!("bytes={}-{}", request.start, request.end));
            }

            let response = builder
                .send()
                .await
                .map_err(|e| map_request_error(url, request.timeout, e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| map_request_error(url, request.timeout, e))?;

            let span = request.end - request.start + 1;
            if request.use_range && status == StatusCode::OK && body.len() as u64 != span {
                return Err(TransportError::RangeIgnored {
                    url: url.to_string(),
                    start: request.start,
                    end: request.end,
                });
            }

            debug!(url, start = request.start, end = request.end, bytes = body.len(), "Range read");
            Ok(body)
        })
    }
}

/// A single URL exposed as a remote object.
///
/// The size comes from a `HEAD` request, falling back to a one-byte ranged
/// `GET` and its `Content-Range` header. Part tables are not discoverable
/// over plain HTTP, so one can be supplied from a manifest.
#[derive(Debug, Clone)]
pub struct HttpObject {
    url: String,
    client: Client,
    timeout: Duration,
    parts: Option<PartTable>,
    digest: Option<String>,
}

impl HttpObject {
    /// Create an object for `url`.
    ///
    /// # Errors
    ///
    /// Returns a `Metadata` error if `url` is not an absolute http(s) URL.
    pub fn new(url: impl Into<String>) -> DownloadResult<Self> {
        let url = url.into();
        validate_url(&url)?;
        let timeout = Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECS);
        let client = build_client(timeout).map_err(|e| DownloadError::Metadata {
            object: url.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            url,
            client,
            timeout,
            parts: None,
            digest: None,
        })
    }

    /// Use a known part table instead of a single synthetic part.
    pub fn with_parts(mut self, parts: PartTable) -> Self {
        self.parts = Some(parts);
        self
    }

    /// Expected digest of the whole object.
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Timeout for metadata requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn metadata_error(&self, reason: impl Into<String>) -> DownloadError {
        DownloadError::Metadata {
            object: self.url.clone(),
            reason: reason.into(),
        }
    }

    async fn head_size(&self) -> Option<u64> {
        let response = self
            .client
            .head(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .ok()
            .filter(|r| r.status().is_success())?;

        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
    }

    async fn size_from_range_request(&self) -> DownloadResult<u64> {
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, "bytes=0-0")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.metadata_error(e.to_string()))?;

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(self.metadata_error(format!(
                "size request returned HTTP {}",
                response.status()
            )));
        }

        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| self.metadata_error("server did not report the object size"))
    }
}

impl RemoteObject for HttpObject {
    fn id(&self) -> &str {
        &self.url
    }

    fn describe(&self) -> BoxFuture<'_, DownloadResult<ObjectDescription>> {
        Box::pin(async move {
            let size = match self.head_size().await {
                Some(size) => size,
                None => self.size_from_range_request().await?,
            };

            let mut status = FileStatus::new(size);
            status.digest = self.digest.clone();

            Ok(ObjectDescription {
                status,
                parts: self.parts.clone(),
            })
        })
    }

    fn fetch_descriptor<'a>(
        &'a self,
        _sub_path: &'a str,
    ) -> BoxFuture<'a, Result<FetchDescriptor, TransportError>> {
        // A plain URL names exactly one file; the sub-path only shapes the
        // local destination.
        Box::pin(async move { Ok(FetchDescriptor::direct(self.url.clone())) })
    }
}

/// Resolves raw identifiers that are http(s) URLs into [`HttpObject`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpResolver;

impl HttpResolver {
    /// Create a resolver.
    pub fn new() -> Self {
        Self
    }
}

impl ObjectResolver for HttpResolver {
    fn resolve<'a>(&'a self, id: &'a str) -> BoxFuture<'a, DownloadResult<Arc<dyn RemoteObject>>> {
        Box::pin(async move {
            let object: Arc<dyn RemoteObject> = Arc::new(HttpObject::new(id)?);
            Ok(object)
        })
    }
}

fn validate_url(url: &str) -> DownloadResult<()> {
    let parsed = Url::parse(url).map_err(|e| DownloadError::Metadata {
        object: url.to_string(),
        reason: format!("invalid URL: {}", e),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(DownloadError::Metadata {
            object: url.to_string(),
            reason: format!("unsupported URL scheme '{}'", scheme),
        }),
    }
}

/// Parse the total size from `Content-Range: bytes 0-0/1234`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}
