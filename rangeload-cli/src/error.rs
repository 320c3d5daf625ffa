//! CLI error type.

use std::fmt;

use rangeload::config::ConfigFileError;
use rangeload::logging::LoggingError;
use rangeload::DownloadError;

/// Errors surfaced to the user by the CLI.
#[derive(Debug)]
pub enum CliError {
    /// Invalid arguments or configuration.
    Config(String),
    /// The configuration file could not be read or written.
    ConfigFile(ConfigFileError),
    /// Logging could not be initialised.
    Logging(LoggingError),
    /// The part manifest could not be loaded.
    Manifest(String),
    /// The async runtime could not be started.
    Runtime(std::io::Error),
    /// The download failed.
    Download(DownloadError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Logging(e) => write!(f, "{}", e),
            CliError::Manifest(msg) => write!(f, "Invalid part manifest: {}", msg),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Download(e) => write!(f, "Download failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Download(e) => Some(e),
            CliError::Config(_) | CliError::Manifest(_) => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        CliError::Download(e)
    }
}
