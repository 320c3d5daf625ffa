//! rangeload - resumable, integrity-checked parallel downloads.
//!
//! A remote object is split into parts with declared sizes and digests.
//! Parts are fetched as bounded byte ranges by a pool of concurrent workers,
//! written in order to a local file and verified part by part. An existing
//! partial file is verified first and the download continues after its last
//! good part. Retryable failures start a fresh attempt until the failing
//! part runs out of retries.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rangeload::remote::http::{HttpRangeReader, HttpResolver};
//! use rangeload::{DownloadConfig, DownloadTarget, Downloader};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(DownloadConfig::default(), Arc::new(HttpRangeReader::new()?))
//!     .with_resolver(Arc::new(HttpResolver::new()));
//!
//! let report = downloader
//!     .download(
//!         "https://example.com/data.bin",
//!         &DownloadTarget::new("downloads", "data.bin"),
//!     )
//!     .await?;
//! println!("{} bytes in {} attempt(s)", report.bytes_transferred, report.attempts);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod digest;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod integrity;
pub mod local;
pub mod logging;
pub mod plan;
pub mod progress;
pub mod remote;
pub mod resume;
pub mod session;

pub use config::DownloadConfig;
pub use downloader::{DownloadReport, Downloader};
pub use error::{DownloadError, DownloadResult, TransportError};
pub use remote::ObjectRef;
pub use session::DownloadTarget;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
