//! Remote object abstraction.
//!
//! The engine never talks to a storage service directly. It consumes three
//! capabilities:
//!
//! - [`RemoteObject`]: metadata for one object and short-lived fetch
//!   descriptors for its contents
//! - [`ObjectResolver`]: turns a raw identifier into a [`RemoteObject`]
//! - [`RangeReader`]: resolves a URL + headers + byte range into bytes
//!
//! ```text
//! logical object ──fetch_descriptor──► {url, headers} ──read_range──► bytes
//!                                            │ (indirect)
//!                                            └──read_range──► storage url ──read_range──► bytes
//! ```
//!
//! [`http`] provides implementations of all three over plain HTTP(S).
//!
//! The traits return [`BoxFuture`]s so they can be used as trait objects
//! (`Arc<dyn RangeReader>`).

pub mod http;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{DownloadResult, TransportError};
use crate::plan::{FileStatus, PartTable};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Metadata of a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescription {
    /// Size and state of the object.
    pub status: FileStatus,
    /// Part table, when the source publishes one.
    pub parts: Option<PartTable>,
}

impl ObjectDescription {
    /// Description without a part table.
    pub fn new(status: FileStatus) -> Self {
        Self {
            status,
            parts: None,
        }
    }

    /// Attach a part table.
    pub fn with_parts(mut self, parts: PartTable) -> Self {
        self.parts = Some(parts);
        self
    }
}

/// Where and how to read an object's bytes.
///
/// Descriptors are short-lived; a fresh one is requested for every chunk.
#[derive(Clone, PartialEq, Eq)]
pub struct FetchDescriptor {
    /// URL to issue ranged reads against.
    pub url: String,
    /// Headers to send with every read.
    pub headers: Vec<(String, String)>,
    /// When set, reading `url` yields the storage URL rather than the data,
    /// and the range must be read again from that location.
    pub indirect: bool,
}

impl FetchDescriptor {
    /// A direct descriptor without extra headers.
    pub fn direct(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            indirect: false,
        }
    }

    /// An indirect descriptor whose first read yields the storage URL.
    pub fn indirect(url: impl Into<String>) -> Self {
        Self {
            indirect: true,
            ..Self::direct(url)
        }
    }

    /// Add a header to send with every read.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl fmt::Debug for FetchDescriptor {
    // Header values may hold credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("FetchDescriptor")
            .field("url", &self.url)
            .field("headers", &names)
            .field("indirect", &self.indirect)
            .finish()
    }
}

/// One ranged read.
#[derive(Debug, Clone)]
pub struct RangeRead {
    /// URL to read from.
    pub url: String,
    /// Headers to send.
    pub headers: Vec<(String, String)>,
    /// First byte (inclusive).
    pub start: u64,
    /// Last byte (inclusive).
    pub end: u64,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Whether to send a Range header at all.
    pub use_range: bool,
}

/// A remote object that can be described and read.
pub trait RemoteObject: Send + Sync {
    /// Identifier used in logs and error messages.
    fn id(&self) -> &str;

    /// Resolve the object's status and, when available, its part table.
    fn describe(&self) -> BoxFuture<'_, DownloadResult<ObjectDescription>>;

    /// Obtain a fetch descriptor for the object, or for `sub_path` inside it.
    fn fetch_descriptor<'a>(
        &'a self,
        sub_path: &'a str,
    ) -> BoxFuture<'a, Result<FetchDescriptor, TransportError>>;
}

/// Resolves raw identifiers into remote objects.
pub trait ObjectResolver: Send + Sync {
    /// Resolve `id` into an object handle.
    fn resolve<'a>(&'a self, id: &'a str) -> BoxFuture<'a, DownloadResult<Arc<dyn RemoteObject>>>;
}

/// Resolves a URL and byte range into raw bytes.
pub trait RangeReader: Send + Sync {
    /// Read the requested range.
    fn read_range(&self, request: RangeRead) -> BoxFuture<'_, Result<Bytes, TransportError>>;
}

/// Reference to the object to download.
///
/// Either an already-resolved handle or a raw identifier; the choice is made
/// once when a download attempt starts.
#[derive(Clone)]
pub enum ObjectRef {
    /// An object handle the caller already holds.
    Handle(Arc<dyn RemoteObject>),
    /// A raw identifier to resolve through an [`ObjectResolver`].
    Id(String),
}

impl ObjectRef {
    /// Identifier for logging, available before resolution.
    pub fn label(&self) -> &str {
        match self {
            Self::Handle(object) => object.id(),
            Self::Id(id) => id,
        }
    }

    /// Turn this reference into an object handle.
    pub async fn resolve(
        &self,
        resolver: Option<&dyn ObjectResolver>,
    ) -> DownloadResult<Arc<dyn RemoteObject>> {
        match self {
            Self::Handle(object) => Ok(Arc::clone(object)),
            Self::Id(id) => match resolver {
                Some(resolver) => resolver.resolve(id).await,
                None => Err(crate::error::DownloadError::Metadata {
                    object: id.clone(),
                    reason: "no resolver configured for raw object ids".to_string(),
                }),
            },
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(object) => f.debug_tuple("Handle").field(&object.id()).finish(),
            Self::Id(id) => f.debug_tuple("Id").field(id).finish(),
        }
    }
}

impl From<Arc<dyn RemoteObject>> for ObjectRef {
    fn from(object: Arc<dyn RemoteObject>) -> Self {
        Self::Handle(object)
    }
}

impl From<String> for ObjectRef {
    fn from(id: String) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for ObjectRef {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_debug_hides_header_values() {
        let descriptor =
            FetchDescriptor::direct("http://example.com/a").with_header("Authorization", "secret");
        let printed = format!("{:?}", descriptor);
        assert!(printed.contains("Authorization"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_indirect_descriptor() {
        let descriptor = FetchDescriptor::indirect("http://api/download");
        assert!(descriptor.indirect);
        assert!(descriptor.headers.is_empty());
    }

    #[tokio::test]
    async fn test_raw_id_without_resolver_fails() {
        let reference = ObjectRef::from("object-1");
        assert_eq!(reference.label(), "object-1");

        let result = reference.resolve(None).await;
        assert!(matches!(
            result,
            Err(crate::error::DownloadError::Metadata { .. })
        ));
    }
}
