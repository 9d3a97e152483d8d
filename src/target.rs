use crate::annotate::{Annotator, DEFAULT_FONT_PATH};
use crate::config::ComponentConfig;
use crate::model::Record;
use crate::photos::auth::ClientParams;
use crate::photos::client::GooglePhotosClient;
use crate::photos::{clear_album, find_album_id, upload_images, PhotosApi};
use anyhow::{bail, Context};
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
}

/// A publishing destination. Each run calls the three phases in order, once.
#[async_trait]
pub trait Target: Send + Sync {
    /// Clears whatever the previous run published.
    async fn preprocess(&mut self) -> anyhow::Result<()>;

    async fn post_tweets(&mut self, records: &[Record]) -> anyhow::Result<PublishReport>;

    async fn postprocess(&mut self) -> anyhow::Result<()>;
}

fn default_font_path() -> PathBuf {
    PathBuf::from(DEFAULT_FONT_PATH)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GooglePhotosTargetParams {
    pub album_name: String,
    #[serde(default)]
    pub create_if_missing: bool,
    pub client_params: ClientParams,
    #[serde(default = "default_font_path")]
    pub font_path: PathBuf,
}

/// Keeps a photo album in sync with the latest scrape: the album is emptied,
/// then every record is annotated and uploaded into it.
pub struct GooglePhotosTarget {
    album_name: String,
    create_if_missing: bool,
    api: Box<dyn PhotosApi>,
    annotator: Annotator,
    album_id: Option<String>,
}

impl GooglePhotosTarget {
    pub fn from_config(component: &ComponentConfig) -> anyhow::Result<Self> {
        let params: GooglePhotosTargetParams = component.params()?;
        let annotator = Annotator::from_file(&params.font_path)?;
        let client = GooglePhotosClient::new(params.client_params)?;
        Ok(Self::new(
            params.album_name,
            params.create_if_missing,
            Box::new(client),
            annotator,
        ))
    }

    pub fn new(
        album_name: String,
        create_if_missing: bool,
        api: Box<dyn PhotosApi>,
        annotator: Annotator,
    ) -> Self {
        Self {
            album_name,
            create_if_missing,
            api,
            annotator,
            album_id: None,
        }
    }
}

async fn resolve_album(
    api: &dyn PhotosApi,
    album_name: &str,
    create_if_missing: bool,
) -> anyhow::Result<String> {
    if let Some(id) = find_album_id(api, album_name).await? {
        return Ok(id);
    }
    if !create_if_missing {
        bail!("No album named '{album_name}'");
    }
    let album = api.create_album(album_name).await?;
    info!("Created new album -- '{}'", album_name);
    Ok(album.id)
}

#[async_trait]
impl Target for GooglePhotosTarget {
    async fn preprocess(&mut self) -> anyhow::Result<()> {
        let album_id = resolve_album(self.api.as_ref(), &self.album_name, self.create_if_missing)
            .await
            .with_context(|| format!("Unable to resolve album '{}'", self.album_name))?;
        clear_album(self.api.as_ref(), &album_id)
            .await
            .with_context(|| format!("Unable to clear album '{}'", self.album_name))?;
        self.album_id = Some(album_id);
        Ok(())
    }

    async fn post_tweets(&mut self, records: &[Record]) -> anyhow::Result<PublishReport> {
        let album_id = match &self.album_id {
            Some(id) => id,
            None => bail!("Album '{}' was not prepared", self.album_name),
        };
        let images = records
            .iter()
            .map(|record| {
                self.annotator
                    .annotate(&record.image, &record.text)
                    .with_context(|| format!("Unable to annotate tweet {}", record.id))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let report = upload_images(self.api.as_ref(), album_id, &images).await;
        Ok(PublishReport {
            published: report.added.len(),
            failed: report.failed.len(),
        })
    }

    async fn postprocess(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
