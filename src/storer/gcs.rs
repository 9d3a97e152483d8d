//! Google Cloud Storage uploads through the JSON API.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1/";
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unable to read {0}: {1}")]
    FileError(PathBuf, #[source] std::io::Error),
    #[error("Error performing HTTP request: {0}")]
    RequestError(
        #[source]
        #[from]
        reqwest::Error,
    ),
    #[error("Received unsuccessful response code: {0}\n{1}")]
    BadResponse(u16, String),
    #[error("Blob path must look like `bucket/path/to/object`: {0:?}")]
    InvalidPath(String),
    #[error("Unable to obtain storage credentials")]
    Credentials(
        #[source]
        #[from]
        gcp_auth::Error,
    ),
}

/// `{bucket}/{object path}`; the first segment names the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPath {
    pub bucket: String,
    pub object: String,
}

impl FromStr for BlobPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                object: object.to_string(),
            }),
            _ => Err(StoreError::InvalidPath(s.to_string())),
        }
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.object)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads the local file at `source` to `target`, replacing any existing object.
    async fn upload(&self, source: &Path, target: &BlobPath) -> Result<(), StoreError>;
}

/// Supplies a bearer token for each upload.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, StoreError>;
}

/// A token handed over in the config. It is never refreshed.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, StoreError> {
        Ok(self.0.clone())
    }
}

/// Service account or application default credentials, discovered on first use
/// (`GOOGLE_APPLICATION_CREDENTIALS`, gcloud user credentials, metadata server).
/// The provider caches tokens and refreshes them before they expire.
#[derive(Default)]
pub struct AmbientCredentials {
    provider: OnceCell<Arc<dyn gcp_auth::TokenProvider>>,
}

#[async_trait]
impl TokenSource for AmbientCredentials {
    async fn token(&self) -> Result<String, StoreError> {
        let provider = self.provider.get_or_try_init(gcp_auth::provider).await?;
        let token = provider.token(&[STORAGE_SCOPE]).await?;
        Ok(token.as_str().to_string())
    }
}

pub struct GcsClient {
    client: Client,
    tokens: Box<dyn TokenSource>,
}

impl GcsClient {
    pub fn new(tokens: Box<dyn TokenSource>) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::builder().build()?,
            tokens,
        })
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("json") | Some("record") => "application/json",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    async fn upload(&self, source: &Path, target: &BlobPath) -> Result<(), StoreError> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| StoreError::FileError(source.to_path_buf(), e))?;
        let mut url = Url::from_str(UPLOAD_BASE)
            .and_then(|u| u.join(&format!("b/{}/o", target.bucket)))
            .map_err(|_| StoreError::InvalidPath(target.to_string()))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &target.object);
        let token = self.tokens.token().await?;
        debug!("Uploading {} bytes to {}", bytes.len(), target);
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, content_type(source))
            .body(bytes)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::BadResponse(status.as_u16(), text));
        }
        info!("Uploaded {}", target);
        Ok(())
    }
}
