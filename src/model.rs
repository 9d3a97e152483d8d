use crate::download::{DownloadError, MediaFetcher};
use crate::twitter::Post;
use anyhow::Context;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// One scraped post together with its decoded image.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub text: String,
    pub image_url: String,
    pub image: DynamicImage,
    pub source: serde_json::Value,
}

/// The serialized form of a [`Record`], written next to its image when archiving.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RecordFile {
    pub id: String,
    pub text: String,
    pub url: String,
}

impl Record {
    /// Downloads the post's image; any fetch failure is returned to the caller.
    pub async fn fetch(post: Post, fetcher: &dyn MediaFetcher) -> Result<Self, DownloadError> {
        let image = fetcher.fetch_image(&post.media_url).await?;
        Ok(Self {
            id: post.id,
            text: post.text,
            image_url: post.media_url.to_string(),
            image,
            source: post.raw,
        })
    }

    pub fn record_file(&self) -> RecordFile {
        RecordFile {
            id: self.id.clone(),
            text: self.text.clone(),
            url: self.image_url.clone(),
        }
    }
}

impl RecordFile {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("Unable to read record {}", path.display()))?;
        serde_json::from_str(&text).context("Unable to deserialize record")
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = serde_json::to_string(self)?;
        fs::write(path, text)
            .await
            .with_context(|| format!("Unable to write record {}", path.display()))
    }
}
