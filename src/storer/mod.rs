pub mod gcs;

use crate::config::ComponentConfig;
use crate::model::Record;
use anyhow::Context;
use async_trait::async_trait;
use gcs::{AmbientCredentials, BlobPath, GcsClient, ObjectStore, StaticToken, TokenSource};
use log::info;
use serde::Deserialize;
use std::path::Path;

/// Archives scraped records to durable storage.
#[async_trait]
pub trait Storer: Send + Sync {
    /// Stages every record under `staging` and uploads it. The first failure aborts.
    async fn store(&self, records: &[Record], staging: &Path) -> anyhow::Result<()>;
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcsStorerParams {
    pub bucket: String,
    pub record_prefix: String,
    pub image_prefix: String,
    /// Overrides the ambient Google credentials. Short-lived; meant for one-off runs.
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Writes `{bucket}/{image_prefix}/{id}.png` and `{bucket}/{record_prefix}/{id}.record`.
pub struct GcsStorer {
    bucket: String,
    record_prefix: String,
    image_prefix: String,
    store: Box<dyn ObjectStore>,
}

impl GcsStorer {
    pub fn from_config(component: &ComponentConfig) -> anyhow::Result<Self> {
        let params: GcsStorerParams = component.params()?;
        let tokens: Box<dyn TokenSource> = match params.access_token {
            Some(token) => Box::new(StaticToken(token)),
            None => Box::new(AmbientCredentials::default()),
        };
        let store = GcsClient::new(tokens)?;
        Ok(Self::new(
            params.bucket,
            params.record_prefix,
            params.image_prefix,
            Box::new(store),
        ))
    }

    pub fn new(
        bucket: String,
        record_prefix: String,
        image_prefix: String,
        store: Box<dyn ObjectStore>,
    ) -> Self {
        Self {
            bucket,
            record_prefix,
            image_prefix,
            store,
        }
    }

    fn blob_path(&self, prefix: &str, file_name: &str) -> anyhow::Result<BlobPath> {
        let prefix = prefix.trim_matches('/');
        let path = if prefix.is_empty() {
            format!("{}/{}", self.bucket, file_name)
        } else {
            format!("{}/{}/{}", self.bucket, prefix, file_name)
        };
        Ok(path.parse::<BlobPath>()?)
    }
}

#[async_trait]
impl Storer for GcsStorer {
    async fn store(&self, records: &[Record], staging: &Path) -> anyhow::Result<()> {
        for record in records {
            let image_name = format!("{}.png", record.id);
            let record_name = format!("{}.record", record.id);
            let image_path = staging.join(&image_name);
            let record_path = staging.join(&record_name);

            record
                .image
                .save(&image_path)
                .with_context(|| format!("Unable to stage image for {}", record.id))?;
            record.record_file().save(&record_path).await?;

            self.store
                .upload(&image_path, &self.blob_path(&self.image_prefix, &image_name)?)
                .await
                .with_context(|| format!("Unable to upload image for {}", record.id))?;
            self.store
                .upload(
                    &record_path,
                    &self.blob_path(&self.record_prefix, &record_name)?,
                )
                .await
                .with_context(|| format!("Unable to upload record for {}", record.id))?;
        }
        info!("Stored {} records in {}", records.len(), self.bucket);
        Ok(())
    }
}
