//! The `get` command: download one URL.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use console::{style, Term};
use rangeload::config::ConfigFile;
use rangeload::digest::DigestAlgorithm;
use rangeload::local::WriteMode;
use rangeload::logging::init_logging;
use rangeload::plan::PartTable;
use rangeload::progress::{SharedProgress, StderrProgress};
use rangeload::remote::http::{HttpObject, HttpRangeReader};
use rangeload::remote::{ObjectRef, RemoteObject};
use rangeload::{DownloadConfig, DownloadTarget, Downloader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CliError;
use crate::progress::BarProgress;

/// Digest algorithm selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum DigestArg {
    Md5,
    Sha256,
}

impl From<DigestArg> for DigestAlgorithm {
    fn from(arg: DigestArg) -> Self {
        match arg {
            DigestArg::Md5 => DigestAlgorithm::Md5,
            DigestArg::Sha256 => DigestAlgorithm::Sha256,
        }
    }
}

/// Arguments of `rangeload get`.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// URL of the object to download
    pub url: String,

    /// Destination directory
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// File name inside the destination directory (defaults to the last URL segment)
    #[arg(long)]
    pub name: Option<String>,

    /// JSON part manifest: {"1": {"size": N, "md5": "..."}, ...}
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Bytes per ranged request
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Concurrent requests
    #[arg(long)]
    pub workers: Option<usize>,

    /// Attempts per part before giving up
    #[arg(long)]
    pub retries: Option<u32>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Append to an existing file instead of verifying and resuming it
    #[arg(long)]
    pub append: bool,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,

    /// Running inside a batch worker: fetch the first chunk alone
    #[arg(long)]
    pub worker: bool,

    /// Digest algorithm of the manifest checksums
    #[arg(long, value_enum)]
    pub digest: Option<DigestArg>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl GetArgs {
    /// Merge the config file with command-line overrides.
    pub fn download_config(&self, file: &ConfigFile) -> Result<DownloadConfig, CliError> {
        let mut config = file.download_config();

        if let Some(chunk_size) = self.chunk_size {
            if chunk_size == 0 {
                return Err(CliError::Config("--chunk-size must be greater than 0".to_string()));
            }
            config = config.with_chunk_size(chunk_size);
        }
        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err(CliError::Config("--workers must be greater than 0".to_string()));
            }
            config = config.with_workers(workers);
        }
        if let Some(retries) = self.retries {
            config = config.with_part_retries(retries);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_request_timeout(Duration::from_secs(timeout));
        }
        if let Some(digest) = self.digest {
            config = config.with_digest_algorithm(digest.into());
        }
        if self.append {
            config = config.with_write_mode(WriteMode::Append);
        }

        Ok(config
            .with_show_progress(self.progress)
            .with_worker_context(self.worker))
    }

    /// Local file name for the download.
    pub fn file_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| file_name_from_url(&self.url))
    }
}

/// Last non-empty path segment of `url`, without query or fragment.
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    path.split('/')
        .skip(1)
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| "download".to_string())
}

fn load_manifest(path: &PathBuf) -> Result<PartTable, CliError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| CliError::Manifest(format!("{}: {}", path.display(), e)))?;
    PartTable::from_json(&json).map_err(|e| CliError::Manifest(format!("{}: {}", path.display(), e)))
}

/// Progress sink for stderr: a bar on a terminal, plain lines otherwise.
fn progress_sink(stderr_is_term: bool) -> SharedProgress {
    if stderr_is_term {
        Arc::new(BarProgress::new())
    } else {
        Arc::new(StderrProgress)
    }
}

/// Run the download.
pub fn run(args: GetArgs) -> Result<(), CliError> {
    let file = ConfigFile::load()?;
    let _logging = init_logging(file.logging.directory.as_deref(), args.verbose)?;

    let config = args.download_config(&file)?;
    debug!(?config, "Resolved download configuration");

    let mut object = HttpObject::new(&args.url)?.with_timeout(config.request_timeout);
    if let Some(path) = &args.manifest {
        object = object.with_parts(load_manifest(path)?);
    }
    let object: Arc<dyn RemoteObject> = Arc::new(object);

    let reader = HttpRangeReader::new().map_err(|e| CliError::Config(e.to_string()))?;
    let target = DownloadTarget::new(&args.output, args.file_name());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let cancel = CancellationToken::new();
    let report = runtime.block_on(async {
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping download");
                on_interrupt.cancel();
            }
        });

        Downloader::new(config, Arc::new(reader))
            .with_progress(progress_sink(Term::stderr().is_term()))
            .with_cancellation(cancel.clone())
            .download(ObjectRef::from(object), &target)
            .await
    })?;

    println!(
        "{} {} ({} bytes transferred, {} attempt{})",
        style("Downloaded").green().bold(),
        report.path.display(),
        report.bytes_transferred,
        report.attempts,
        if report.attempts == 1 { "" } else { "s" }
    );
    if report.resumed_from > 0 {
        println!("  Resumed after {} verified bytes", report.resumed_from);
    }
    for warning in &report.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: GetArgs,
    }

    fn parse(argv: &[&str]) -> GetArgs {
        let mut full = vec!["rangeload"];
        full.extend_from_slice(argv);
        TestCli::parse_from(full).args
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(file_name_from_url("https://host/a/b/data.bin"), "data.bin");
        assert_eq!(file_name_from_url("https://host/a/data.bin?x=1#frag"), "data.bin");
        assert_eq!(file_name_from_url("https://host/dir/"), "dir");
        assert_eq!(file_name_from_url("https://host"), "download");
    }

    #[test]
    fn test_flags_override_config_file() {
        let args = parse(&[
            "https://host/f",
            "--chunk-size",
            "1024",
            "--workers",
            "2",
            "--append",
            "--digest",
            "sha256",
        ]);
        let config = args.download_config(&ConfigFile::default()).unwrap();

        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.workers, 2);
        assert_eq!(config.part_retries, 3);
        assert_eq!(config.write_mode, WriteMode::Append);
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha256);
        assert!(!config.show_progress);
    }

    #[test]
    fn test_config_file_values_used_without_flags() {
        let mut file = ConfigFile::default();
        file.download.workers = 12;
        file.download.timeout = 5;

        let config = parse(&["https://host/f"]).download_config(&file).unwrap();
        assert_eq!(config.workers, 12);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.write_mode, WriteMode::Resume);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let args = parse(&["https://host/f", "--workers", "0"]);
        assert!(args.download_config(&ConfigFile::default()).is_err());
    }

    #[test]
    fn test_name_overrides_url() {
        let args = parse(&["https://host/f.bin", "--name", "sub/out.bin"]);
        assert_eq!(args.file_name(), "sub/out.bin");
    }

    #[test]
    fn test_progress_sink_for_redirected_stderr() {
        use rangeload::progress::{ProgressAction, ProgressUpdate};

        let sink = progress_sink(false);
        sink.update(&ProgressUpdate {
            action: ProgressAction::Downloaded,
            bytes_done: 10,
            total: Some(20),
            label: "f.bin".to_string(),
        });
        sink.finish();
    }

    #[test]
    fn test_load_manifest() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("parts.json");
        std::fs::write(&path, r#"{"1": {"size": 10, "md5": "abc"}, "2": {"size": 5}}"#).unwrap();

        let table = load_manifest(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.total_size(), Some(15));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_manifest(&path), Err(CliError::Manifest(_))));
    }
}
