//! HTTP download source

use anyhow::anyhow;
use app_core::{DownloadError, DownloadSource};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("MediaLibrarian/", env!("CARGO_PKG_VERSION"));

/// Fetches images and RSS payloads over HTTP(S). Has no download client,
/// so probing is unsupported.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| anyhow!("failed to build HTTP client: {err}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DownloadSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| DownloadError::Http(err.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|err| DownloadError::Http(err.to_string()))?;

        tracing::debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body.to_vec())
    }
}
