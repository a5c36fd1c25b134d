//! Error types used by the crate.

use std::time::Duration;

use image::ImageError;
use thiserror::Error;

/// Tessera error type.
#[derive(Debug, Error)]
pub enum TesseraError {
    /// I/O error (network or file)
    #[error("failed to load data")]
    IO,
    /// Remote server responded with a non-success status.
    #[error("server responded with status {0}")]
    Http(u16),
    /// Tile request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Item not found.
    #[error("item not found")]
    NotFound,
    /// Error decoding data.
    #[error("failed to decode data: {0}")]
    Decoding(String),
    /// Image decoding error.
    #[error("image decode error: {0:?}")]
    ImageDecode(#[from] ImageError),
    /// Configuration values are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Error reading/writing data to the FS.
    #[error("file system error: {0}")]
    FsIo(#[from] std::io::Error),
    /// Asynchronous task was started outside of a tokio runtime.
    #[error("no async runtime available to run the task")]
    NoRuntime,
    /// Generic error - details are inside.
    #[error("{0}")]
    Generic(String),
}

impl From<reqwest::Error> for TesseraError {
    fn from(value: reqwest::Error) -> Self {
        log::debug!("Http request failed: {value}");
        match value.status() {
            Some(status) => Self::Http(status.as_u16()),
            None => Self::IO,
        }
    }
}
