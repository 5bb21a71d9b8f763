//! Download source interface
//!
//! Download actions only know how to ask for bytes; where they come from
//! (HTTP, a torrent client, a local mirror) is up to the implementation.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Download failed: {0}")]
    Other(String),
}

/// Fetches remote artifacts for download actions
#[async_trait]
pub trait DownloadSource: Send + Sync {
    /// Fetch the complete body at `url`
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;

    /// Ask an external download client whether it already tracks `query`
    async fn probe(&self, query: &str) -> Result<bool, DownloadError> {
        Err(DownloadError::Unsupported(format!(
            "no download client configured to probe '{}'",
            query
        )))
    }
}

/// Rejects every request; used when no source has been configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDownloads;

#[async_trait]
impl DownloadSource for NoDownloads {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        Err(DownloadError::Unsupported(format!(
            "no download source configured for {}",
            url
        )))
    }
}
