//! INI configuration file.
//!
//! Settings live in `config.ini` under the platform configuration directory
//! (`~/.config/rangeload/config.ini` on Linux):
//!
//! ```ini
//! [download]
//! chunk_size = 16777216
//! workers = 4
//! retries = 3
//! timeout = 600
//! digest = md5
//!
//! [logging]
//! directory = /var/log/rangeload
//! ```
//!
//! Missing keys fall back to [`DownloadConfig`] defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::download::DownloadConfig;
use crate::digest::DigestAlgorithm;

/// Errors from loading, saving or editing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: ini::Error },

    #[error("failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    pub chunk_size: u64,
    pub workers: usize,
    pub retries: u32,
    /// Request timeout in seconds.
    pub timeout: u64,
    pub digest: DigestAlgorithm,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        let defaults = DownloadConfig::default();
        Self {
            chunk_size: defaults.chunk_size,
            workers: defaults.workers,
            retries: defaults.part_retries,
            timeout: defaults.request_timeout.as_secs(),
            digest: defaults.digest_algorithm,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Directory for `rangeload.log`; no file logging when unset.
    pub directory: Option<PathBuf>,
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub download: DownloadSettings,
    pub logging: LoggingSettings,
}

/// Directory holding the configuration file.
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rangeload")
}

/// Path of the configuration file.
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

impl ConfigFile {
    /// Load from the default location; a missing file yields defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::default();
        for key in ConfigKey::all() {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                let value = value.trim();
                if !value.is_empty() {
                    key.set(&mut config, value)?;
                }
            }
        }
        Ok(config)
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating its directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        let write_error = |source| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }
        ini.write_to_file(path).map_err(write_error)
    }

    /// Download configuration with the file's values applied.
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig::default()
            .with_chunk_size(self.download.chunk_size)
            .with_workers(self.download.workers)
            .with_part_retries(self.download.retries)
            .with_request_timeout(Duration::from_secs(self.download.timeout))
            .with_digest_algorithm(self.download.digest)
    }
}

/// A settable key in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ChunkSize,
    Workers,
    Retries,
    Timeout,
    Digest,
    LogDirectory,
}

impl ConfigKey {
    /// All keys in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            Self::ChunkSize,
            Self::Workers,
            Self::Retries,
            Self::Timeout,
            Self::Digest,
            Self::LogDirectory,
        ]
    }

    /// INI section of this key.
    pub fn section(self) -> &'static str {
        match self {
            Self::LogDirectory => "logging",
            _ => "download",
        }
    }

    /// Key name within its section.
    pub fn key_name(self) -> &'static str {
        match self {
            Self::ChunkSize => "chunk_size",
            Self::Workers => "workers",
            Self::Retries => "retries",
            Self::Timeout => "timeout",
            Self::Digest => "digest",
            Self::LogDirectory => "directory",
        }
    }

    /// Fully qualified `section.key` name.
    pub fn name(self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as a string; empty when unset.
    pub fn get(self, config: &ConfigFile) -> String {
        match self {
            Self::ChunkSize => config.download.chunk_size.to_string(),
            Self::Workers => config.download.workers.to_string(),
            Self::Retries => config.download.retries.to_string(),
            Self::Timeout => config.download.timeout.to_string(),
            Self::Digest => config.download.digest.to_string(),
            Self::LogDirectory => config
                .logging
                .directory
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Parse and store `value`.
    pub fn set(self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigFileError> {
        let invalid = |reason: String| ConfigFileError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason,
        };

        match self {
            Self::ChunkSize => {
                config.download.chunk_size = parse_positive(value).map_err(invalid)?;
            }
            Self::Workers => {
                config.download.workers = parse_positive::<usize>(value).map_err(invalid)?;
            }
            Self::Retries => {
                config.download.retries = parse_positive::<u32>(value).map_err(invalid)?;
            }
            Self::Timeout => {
                config.download.timeout = parse_positive(value).map_err(invalid)?;
            }
            Self::Digest => {
                config.download.digest = value.parse().map_err(invalid)?;
            }
            Self::LogDirectory => {
                config.logging.directory = Some(PathBuf::from(value));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|key| key.name() == s)
            .ok_or_else(|| ConfigFileError::UnknownKey(s.to_string()))
    }
}

fn parse_positive<T>(value: &str) -> Result<T, String>
where
    T: FromStr + PartialEq + Default,
    T::Err: fmt::Display,
{
    let parsed: T = value.trim().parse().map_err(|e: T::Err| e.to_string())?;
    if parsed == T::default() {
        return Err("must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.download_config(), DownloadConfig::default());
    }

    #[test]
    fn test_load_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(
            &path,
            "[download]\nchunk_size = 1048576\nworkers = 8\ndigest = sha256\n\n[logging]\ndirectory = /tmp/logs\n",
        )
        .unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.download.chunk_size, 1048576);
        assert_eq!(config.download.workers, 8);
        assert_eq!(config.download.retries, 3);
        assert_eq!(config.download.digest, DigestAlgorithm::Sha256);
        assert_eq!(config.logging.directory, Some(PathBuf::from("/tmp/logs")));

        let download = config.download_config();
        assert_eq!(download.chunk_size, 1048576);
        assert_eq!(download.workers, 8);
    }

    #[test]
    fn test_invalid_value_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[download]\nworkers = 0\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigFileError::InvalidValue { .. }));
        assert!(err.to_string().contains("download.workers"));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.ini");

        let mut config = ConfigFile::default();
        ConfigKey::Timeout.set(&mut config, "42").unwrap();
        ConfigKey::LogDirectory.set(&mut config, "/var/log/rl").unwrap();
        config.save_to(&path).unwrap();

        let reloaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.download_config().request_timeout, Duration::from_secs(42));
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!("download.retries".parse::<ConfigKey>().unwrap(), ConfigKey::Retries);
        assert_eq!("logging.directory".parse::<ConfigKey>().unwrap(), ConfigKey::LogDirectory);
        assert!("download.unknown".parse::<ConfigKey>().is_err());
    }

    #[test]
    fn test_config_file_path() {
        let path = config_file_path();
        assert!(path.ends_with("rangeload/config.ini"));
    }
}
