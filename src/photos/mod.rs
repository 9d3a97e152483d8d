//! Album maintenance on top of the photo library API.

pub mod auth;
pub mod client;
pub mod paging;

use async_trait::async_trait;
use futures::TryStreamExt;
use image::{ImageFormat, RgbaImage};
use log::{error, info};
use paging::{paginate, Page};
use serde::Deserialize;
use std::io::Cursor;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhotosError {
    #[error("Error performing HTTP request: {0}")]
    RequestError(
        #[source]
        #[from]
        reqwest::Error,
    ),
    #[error("Received unsuccessful response code: {0}\n{1}")]
    BadResponse(u16, String),
    #[error("Unable to deserialize response: {0}")]
    InvalidResponse(
        #[source]
        #[from]
        serde_json::Error,
    ),
    #[error("Upload returned an empty upload token")]
    EmptyUploadToken,
    #[error("No media item result in response: {0}")]
    MissingResult(String),
    #[error("Media item rejected with status {code}: {message}")]
    ItemRejected { code: i32, message: String },
    #[error("Unable to encode image: {0}")]
    Encode(
        #[source]
        #[from]
        image::ImageError,
    ),
    #[error("Error accessing {0}: {1}")]
    FileError(PathBuf, #[source] std::io::Error),
    #[error("Authorization failed: {0}")]
    Auth(String),
    #[error("Authorization redirect listener failed")]
    Redirect(#[source] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Album {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaItem {
    pub id: String,
}

/// Per-item status of a media item creation. Absent or zero code means success.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemStatus {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The photo library endpoints the album operations need.
#[async_trait]
pub trait PhotosApi: Send + Sync {
    async fn list_albums(&self, page_token: Option<String>) -> Result<Page<Album>, PhotosError>;

    async fn search_album_items(
        &self,
        album_id: &str,
        page_token: Option<String>,
    ) -> Result<Page<MediaItem>, PhotosError>;

    async fn remove_items(&self, album_id: &str, item_ids: &[String]) -> Result<(), PhotosError>;

    async fn create_album(&self, title: &str) -> Result<Album, PhotosError>;

    /// Uploads raw bytes, returning the upload token.
    async fn upload_bytes(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, PhotosError>;

    /// Exchanges an upload token for a media item placed in `album_id`.
    async fn create_media_item(
        &self,
        album_id: &str,
        file_name: &str,
        upload_token: &str,
    ) -> Result<ItemStatus, PhotosError>;
}

/// Id of the first album whose title matches `name`, ignoring case.
pub async fn find_album_id(
    api: &dyn PhotosApi,
    name: &str,
) -> Result<Option<String>, PhotosError> {
    let wanted = name.to_lowercase();
    let albums = paginate(|token| api.list_albums(token));
    futures::pin_mut!(albums);
    while let Some(album) = albums.try_next().await? {
        if album.title.to_lowercase() == wanted {
            return Ok(Some(album.id));
        }
    }
    Ok(None)
}

/// Removes every media item from the album in a single request. Returns how many were removed.
pub async fn clear_album(api: &dyn PhotosApi, album_id: &str) -> Result<usize, PhotosError> {
    let ids: Vec<String> = paginate(|token| api.search_album_items(album_id, token))
        .map_ok(|item| item.id)
        .try_collect()
        .await?;
    if ids.is_empty() {
        info!("Album {} is already empty", album_id);
        return Ok(0);
    }
    api.remove_items(album_id, &ids).await?;
    info!("Removed {} items from album {}", ids.len(), album_id);
    Ok(ids.len())
}

#[derive(Debug, Default)]
pub struct UploadReport {
    pub added: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Uploads each image and adds it to the album. A failing image is logged and
/// skipped; it never stops the rest of the batch.
pub async fn upload_images(
    api: &dyn PhotosApi,
    album_id: &str,
    images: &[RgbaImage],
) -> UploadReport {
    let mut report = UploadReport::default();
    for (index, image) in images.iter().enumerate() {
        let file_name = format!("upload_photo_{index}.png");
        info!("Uploading photo -- '{}'", file_name);
        match upload_image(api, album_id, &file_name, image).await {
            Ok(()) => {
                info!("Added '{}' to library and album", file_name);
                report.added.push(file_name);
            }
            Err(e) => {
                error!("Could not add '{}' to library -- {}", file_name, e);
                report.failed.push((file_name, e.to_string()));
            }
        }
    }
    report
}

async fn upload_image(
    api: &dyn PhotosApi,
    album_id: &str,
    file_name: &str,
    image: &RgbaImage,
) -> Result<(), PhotosError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    let token = api.upload_bytes(file_name, bytes).await?;
    if token.is_empty() {
        return Err(PhotosError::EmptyUploadToken);
    }
    let status = api.create_media_item(album_id, file_name, &token).await?;
    match status.code {
        Some(code) if code != 0 => Err(PhotosError::ItemRejected {
            code,
            message: status.message.unwrap_or_default(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory library. Album listing and item search are served two per page.
    #[derive(Default)]
    pub(crate) struct FakePhotos {
        pub albums: Vec<Album>,
        pub items: Vec<MediaItem>,
        pub removed: Mutex<Vec<Vec<String>>>,
        pub album_pages_requested: Mutex<usize>,
        /// Upload index -> status code returned on creation
        pub reject: Option<(usize, i32)>,
        pub empty_token_for: Option<usize>,
        pub uploads: Mutex<usize>,
        pub created: Mutex<Vec<(String, String)>>,
    }

    fn page_of<T: Clone>(all: &[T], token: Option<String>) -> Page<T> {
        let start: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + 2).min(all.len());
        Page {
            items: all[start..end].to_vec(),
            next_page_token: (end < all.len()).then(|| end.to_string()),
        }
    }

    #[async_trait]
    impl PhotosApi for FakePhotos {
        async fn list_albums(
            &self,
            page_token: Option<String>,
        ) -> Result<Page<Album>, PhotosError> {
            *self.album_pages_requested.lock().unwrap() += 1;
            Ok(page_of(&self.albums, page_token))
        }

        async fn search_album_items(
            &self,
            _album_id: &str,
            page_token: Option<String>,
        ) -> Result<Page<MediaItem>, PhotosError> {
            Ok(page_of(&self.items, page_token))
        }

        async fn remove_items(
            &self,
            _album_id: &str,
            item_ids: &[String],
        ) -> Result<(), PhotosError> {
            self.removed.lock().unwrap().push(item_ids.to_vec());
            Ok(())
        }

        async fn create_album(&self, title: &str) -> Result<Album, PhotosError> {
            Ok(Album {
                id: format!("new-{title}"),
                title: title.to_string(),
            })
        }

        async fn upload_bytes(
            &self,
            _file_name: &str,
            bytes: Vec<u8>,
        ) -> Result<String, PhotosError> {
            assert!(bytes.starts_with(b"\x89PNG"));
            let mut uploads = self.uploads.lock().unwrap();
            let index = *uploads;
            *uploads += 1;
            if self.empty_token_for == Some(index) {
                return Ok(String::new());
            }
            Ok(format!("token-{index}"))
        }

        async fn create_media_item(
            &self,
            album_id: &str,
            file_name: &str,
            upload_token: &str,
        ) -> Result<ItemStatus, PhotosError> {
            let index: usize = upload_token.trim_start_matches("token-").parse().unwrap();
            if let Some((rejected, code)) = self.reject {
                if rejected == index {
                    return Ok(ItemStatus {
                        code: Some(code),
                        message: Some("Failed to add media item".into()),
                    });
                }
            }
            self.created
                .lock()
                .unwrap()
                .push((album_id.to_string(), file_name.to_string()));
            Ok(ItemStatus::default())
        }
    }

    /// Lets a test keep a handle on the fake after boxing it.
    #[async_trait]
    impl PhotosApi for Arc<FakePhotos> {
        async fn list_albums(
            &self,
            page_token: Option<String>,
        ) -> Result<Page<Album>, PhotosError> {
            (**self).list_albums(page_token).await
        }

        async fn search_album_items(
            &self,
            album_id: &str,
            page_token: Option<String>,
        ) -> Result<Page<MediaItem>, PhotosError> {
            (**self).search_album_items(album_id, page_token).await
        }

        async fn remove_items(
            &self,
            album_id: &str,
            item_ids: &[String],
        ) -> Result<(), PhotosError> {
            (**self).remove_items(album_id, item_ids).await
        }

        async fn create_album(&self, title: &str) -> Result<Album, PhotosError> {
            (**self).create_album(title).await
        }

        async fn upload_bytes(
            &self,
            file_name: &str,
            bytes: Vec<u8>,
        ) -> Result<String, PhotosError> {
            (**self).upload_bytes(file_name, bytes).await
        }

        async fn create_media_item(
            &self,
            album_id: &str,
            file_name: &str,
            upload_token: &str,
        ) -> Result<ItemStatus, PhotosError> {
            (**self)
                .create_media_item(album_id, file_name, upload_token)
                .await
        }
    }

    fn album(id: &str, title: &str) -> Album {
        Album {
            id: id.into(),
            title: title.into(),
        }
    }

    fn item(id: &str) -> MediaItem {
        MediaItem { id: id.into() }
    }

    #[tokio::test]
    async fn album_lookup_ignores_case_across_pages() {
        let api = FakePhotos {
            albums: vec![
                album("1", "Holiday"),
                album("2", "Work"),
                album("3", "Beautiful-S2-Prod"),
                album("4", "beautiful-s2-prod"),
                album("5", "Later"),
            ],
            ..Default::default()
        };
        let id = find_album_id(&api, "beautiful-s2-prod").await.unwrap();
        assert_eq!(id.as_deref(), Some("3"));
        assert_eq!(*api.album_pages_requested.lock().unwrap(), 2);
        assert_eq!(find_album_id(&api, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clearing_removes_all_items_in_one_request() {
        let api = FakePhotos {
            items: vec![item("a"), item("b"), item("c"), item("d"), item("e")],
            ..Default::default()
        };
        assert_eq!(clear_album(&api, "album").await.unwrap(), 5);
        assert_eq!(
            *api.removed.lock().unwrap(),
            vec![vec!["a", "b", "c", "d", "e"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()]
        );
    }

    #[tokio::test]
    async fn clearing_an_empty_album_sends_nothing() {
        let api = FakePhotos::default();
        assert_eq!(clear_album(&api, "album").await.unwrap(), 0);
        assert!(api.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_item_is_skipped_and_batch_continues() {
        let api = FakePhotos {
            reject: Some((1, 3)),
            ..Default::default()
        };
        let images = vec![RgbaImage::new(4, 4), RgbaImage::new(4, 4), RgbaImage::new(4, 4)];
        let report = upload_images(&api, "album", &images).await;
        assert_eq!(report.added, vec!["upload_photo_0.png", "upload_photo_2.png"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "upload_photo_1.png");
        assert_eq!(api.created.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_upload_token_is_a_per_image_failure() {
        let api = FakePhotos {
            empty_token_for: Some(0),
            ..Default::default()
        };
        let images = vec![RgbaImage::new(2, 2), RgbaImage::new(2, 2)];
        let report = upload_images(&api, "album", &images).await;
        assert_eq!(report.added, vec!["upload_photo_1.png"]);
        assert_eq!(report.failed[0].0, "upload_photo_0.png");
    }
}
