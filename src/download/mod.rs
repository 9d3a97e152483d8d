use async_trait::async_trait;
use image::DynamicImage;
use log::debug;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Upper bound for a single media download; exceeding it fails the run.
const TIMEOUT_SEC: u64 = 60;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Error performing HTTP request: {0}")]
    RequestError(
        #[source]
        #[from]
        reqwest::Error,
    ),
    #[error("Received unsuccessful response code: {0} for {1}")]
    BadResponse(u16, Url),
    #[error("Unable to decode image from {1}: {0}")]
    Decode(#[source] image::ImageError, Url),
}

/// Fetches and decodes post media.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_image(&self, url: &Url) -> Result<DynamicImage, DownloadError>;
}

pub struct HttpMediaFetcher {
    /// HTTP connection pool
    client: Client,
}

impl HttpMediaFetcher {
    pub fn new() -> Result<Self, DownloadError> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(TIMEOUT_SEC))
                .build()?,
        })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch_image(&self, url: &Url) -> Result<DynamicImage, DownloadError> {
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::BadResponse(
                response.status().as_u16(),
                url.clone(),
            ));
        }
        let bytes = response.bytes().await?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        image::load_from_memory(&bytes).map_err(|e| DownloadError::Decode(e, url.clone()))
    }
}
