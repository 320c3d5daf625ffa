//! Configuration: the per-download [`DownloadConfig`] and the persistent
//! [`ConfigFile`] it can be seeded from.

mod download;
mod file;

pub use download::{
    DownloadConfig, DEFAULT_CHUNK_SIZE, DEFAULT_PART_RETRIES, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_WORKERS, SEQUENTIAL_FIRST_THRESHOLD,
};
pub use file::{
    config_directory, config_file_path, ConfigFile, ConfigFileError, ConfigKey, DownloadSettings,
    LoggingSettings,
};
