use crate::photos::auth::{self, ClientParams};
use crate::photos::paging::Page;
use crate::photos::{Album, ItemStatus, MediaItem, PhotosApi, PhotosError};
use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

const API_BASE: &str = "https://photoslibrary.googleapis.com/v1/";
const SEARCH_PAGE_SIZE: u32 = 100;

/// Photo library REST client. Authorizes on first use; every request carries
/// its own headers so nothing is shared between calls besides the token.
pub struct GooglePhotosClient {
    client: Client,
    params: ClientParams,
    access_token: OnceCell<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumsResponse {
    #[serde(default)]
    albums: Vec<Album>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    media_items: Vec<MediaItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateResponse {
    #[serde(default)]
    new_media_item_results: Vec<NewMediaItemResult>,
}

#[derive(Deserialize)]
struct NewMediaItemResult {
    #[serde(default)]
    status: ItemStatus,
}

#[derive(Deserialize)]
struct Empty {}

async fn read_body(request: RequestBuilder) -> Result<String, PhotosError> {
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    debug!("Server response: {}", text);
    if !status.is_success() {
        return Err(PhotosError::BadResponse(status.as_u16(), text));
    }
    Ok(text)
}

async fn read_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, PhotosError> {
    let text = read_body(request).await?;
    Ok(serde_json::from_str(&text)?)
}

impl GooglePhotosClient {
    pub fn new(params: ClientParams) -> Result<Self, PhotosError> {
        Ok(Self {
            client: Client::builder().build()?,
            params,
            access_token: OnceCell::new(),
        })
    }

    async fn token(&self) -> Result<&str, PhotosError> {
        self.access_token
            .get_or_try_init(|| auth::authorize(&self.client, &self.params))
            .await
            .map(String::as_str)
    }

    async fn get(&self, path: &str) -> Result<RequestBuilder, PhotosError> {
        let token = self.token().await?;
        Ok(self.client.get(format!("{API_BASE}{path}")).bearer_auth(token))
    }

    async fn post(&self, path: &str) -> Result<RequestBuilder, PhotosError> {
        let token = self.token().await?;
        Ok(self.client.post(format!("{API_BASE}{path}")).bearer_auth(token))
    }
}

#[async_trait]
impl PhotosApi for GooglePhotosClient {
    async fn list_albums(&self, page_token: Option<String>) -> Result<Page<Album>, PhotosError> {
        let mut query = vec![("excludeNonAppCreatedData", "false".to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response: AlbumsResponse = read_json(self.get("albums").await?.query(&query)).await?;
        Ok(Page {
            items: response.albums,
            next_page_token: response.next_page_token,
        })
    }

    async fn search_album_items(
        &self,
        album_id: &str,
        page_token: Option<String>,
    ) -> Result<Page<MediaItem>, PhotosError> {
        let mut body = json!({ "albumId": album_id, "pageSize": SEARCH_PAGE_SIZE });
        if let Some(token) = page_token {
            body["pageToken"] = json!(token);
        }
        let response: SearchResponse =
            read_json(self.post("mediaItems:search").await?.json(&body)).await?;
        Ok(Page {
            items: response.media_items,
            next_page_token: response.next_page_token,
        })
    }

    async fn remove_items(&self, album_id: &str, item_ids: &[String]) -> Result<(), PhotosError> {
        let body = json!({ "mediaItemIds": item_ids });
        let path = format!("albums/{album_id}:batchRemoveMediaItems");
        read_json::<Empty>(self.post(&path).await?.json(&body)).await?;
        Ok(())
    }

    async fn create_album(&self, title: &str) -> Result<Album, PhotosError> {
        let body = json!({ "album": { "title": title } });
        read_json(self.post("albums").await?.json(&body)).await
    }

    async fn upload_bytes(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, PhotosError> {
        let request = self
            .post("uploads")
            .await?
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("X-Goog-Upload-Content-Type", "image/png")
            .header("X-Goog-Upload-Protocol", "raw")
            .header("X-Goog-Upload-File-Name", file_name)
            .body(bytes);
        let token = read_body(request).await?;
        if token.is_empty() {
            return Err(PhotosError::EmptyUploadToken);
        }
        Ok(token)
    }

    async fn create_media_item(
        &self,
        album_id: &str,
        file_name: &str,
        upload_token: &str,
    ) -> Result<ItemStatus, PhotosError> {
        let body = json!({
            "albumId": album_id,
            "newMediaItems": [{
                "description": "",
                "simpleMediaItem": { "uploadToken": upload_token, "fileName": file_name }
            }]
        });
        let text = read_body(self.post("mediaItems:batchCreate").await?.json(&body)).await?;
        let response: BatchCreateResponse = serde_json::from_str(&text)?;
        response
            .new_media_item_results
            .into_iter()
            .next()
            .map(|result| result.status)
            .ok_or(PhotosError::MissingResult(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_create_status_defaults_to_success() {
        let response: BatchCreateResponse = serde_json::from_str(
            r#"{"newMediaItemResults":[{"uploadToken":"t","status":{"message":"Success"}}]}"#,
        )
        .unwrap();
        let status = &response.new_media_item_results[0].status;
        assert_eq!(status.code, None);
        assert_eq!(status.message.as_deref(), Some("Success"));
    }

    #[test]
    fn album_pages_read_next_token() {
        let response: AlbumsResponse = serde_json::from_str(
            r#"{"albums":[{"id":"a1","title":"Prod","mediaItemsCount":"3"}],"nextPageToken":"p2"}"#,
        )
        .unwrap();
        assert_eq!(response.albums[0].id, "a1");
        assert_eq!(response.next_page_token.as_deref(), Some("p2"));

        let last: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(last.media_items.is_empty());
        assert!(last.next_page_token.is_none());
    }
}
