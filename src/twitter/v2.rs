use crate::twitter::{Authentication, Post, PostQuery, TwitterClient};
use anyhow::{bail, Context};
use async_trait::async_trait;
use log::{debug, warn};
use maplit::hashmap;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

const TIMEOUT_SEC: u64 = 10;
const API_BASE: &str = "https://api.twitter.com/2/";

#[derive(Clone)]
pub struct TwitterClientV2 {
    client: Client,
}

#[derive(Deserialize)]
struct GetTweetsResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    includes: Option<GetTweetsIncludes>,
}

#[derive(Deserialize)]
struct GetTweetsTweet {
    id: String,
    text: String,
    #[serde(default)]
    attachments: GetTweetsTweetAttachment,
}

#[derive(Deserialize, Default)]
struct GetTweetsTweetAttachment {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Deserialize, Default)]
struct GetTweetsIncludes {
    #[serde(default)]
    media: Vec<GetTweetsMedia>,
}

#[derive(Deserialize)]
struct GetTweetsMedia {
    media_key: String,
    #[serde(flatten)]
    variant: GetTweetsMediaVariant,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GetTweetsMediaVariant {
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "photo")]
    Photo { url: String },
    #[serde(rename = "animated_gif")]
    Gif,
}

async fn deserialize_response<T: DeserializeOwned>(response: Response) -> anyhow::Result<T> {
    let status = response.status().as_u16();
    let text = response.text().await.context("Bad response text")?;
    parse_body(status, &text)
}

/// A 200 may still carry `errors`. Without `data` the call failed; alongside
/// `data` they describe partial failures (e.g. an unavailable referenced tweet).
fn parse_body<T: DeserializeOwned>(status: u16, text: &str) -> anyhow::Result<T> {
    if !(200..300).contains(&status) {
        bail!(format!("Response was not successful: {status}\n{text}"))
    }
    let value: serde_json::Value = serde_json::from_str(text).context("Invalid JSON")?;
    if let Some(errors) = value.get("errors") {
        if value.get("data").is_none() {
            bail!(text.to_string())
        }
        warn!("Response carries partial errors: {}", errors);
    }
    match T::deserialize(&value) {
        Ok(ok) => Ok(ok),
        Err(e) => {
            let pretty = serde_json::to_string_pretty(&value)?;
            bail!(format!(
                "Unable to deserialize due to: {e}\nContents:\n{pretty}"
            ))
        }
    }
}

impl TwitterClientV2 {
    pub fn new(auth: &Authentication) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", auth.bearer_token);
        let value = HeaderValue::from_str(&value)?;
        headers.insert(AUTHORIZATION, value);
        Ok(Self {
            client: Client::builder()
                .default_headers(headers)
                .timeout(Duration::from_secs(TIMEOUT_SEC))
                .build()?,
        })
    }

    async fn get_posts(
        &self,
        path: &str,
        mut params: HashMap<&'static str, String>,
        query: &PostQuery,
    ) -> anyhow::Result<Vec<Post>> {
        let url = Url::from_str(API_BASE)?.join(path)?;
        params.extend(hashmap! {
            "max_results" => query.max_results.to_string(),
            "media.fields" => "url,type,media_key".to_string(),
            "expansions" => "attachments.media_keys".to_string(),
        });
        if !query.tweet_fields.is_empty() {
            params.insert("tweet.fields", query.tweet_fields.join(","));
        }
        let response = self.client.get(url).query(&params).send().await?;
        let response = deserialize_response::<GetTweetsResponse>(response).await?;
        let media = response
            .includes
            .map(|i| i.media)
            .unwrap_or_else(Default::default);
        convert_posts(response.data, &media)
    }
}

#[async_trait]
impl TwitterClient for TwitterClientV2 {
    // https://developer.twitter.com/en/docs/twitter-api/tweets/timelines/api-reference/get-users-id-tweets
    async fn get_tweets_for_user(
        &self,
        user_id: &str,
        query: &PostQuery,
    ) -> anyhow::Result<Vec<Post>> {
        self.get_posts(&format!("users/{user_id}/tweets"), HashMap::new(), query)
            .await
            .with_context(|| format!("Unable to fetch tweets for user {user_id}"))
    }

    // https://developer.twitter.com/en/docs/twitter-api/tweets/search/api-reference/get-tweets-search-recent
    async fn search_recent(&self, search: &str, query: &PostQuery) -> anyhow::Result<Vec<Post>> {
        let params = hashmap! { "query" => search.to_string() };
        self.get_posts("tweets/search/recent", params, query)
            .await
            .with_context(|| format!("Unable to search tweets for {search}"))
    }
}

/// Keeps upstream order. Only the first media key of a post is considered, and
/// posts whose first key does not resolve to a photo are left out.
fn convert_posts(
    tweets: Vec<serde_json::Value>,
    media: &[GetTweetsMedia],
) -> anyhow::Result<Vec<Post>> {
    let mut posts = Vec::with_capacity(tweets.len());
    for raw in tweets {
        let tweet = GetTweetsTweet::deserialize(&raw).context("Unexpected tweet format")?;
        let url = tweet
            .attachments
            .media_keys
            .first()
            .and_then(|key| media.iter().find(|m| &m.media_key == key))
            .and_then(GetTweetsMedia::photo_url);
        match url {
            Some(url) => posts.push(Post {
                media_url: Url::from_str(url).context("Invalid media url")?,
                id: tweet.id,
                text: tweet.text,
                raw,
            }),
            None => debug!("Skipping tweet {} without a photo", tweet.id),
        }
    }
    Ok(posts)
}

impl GetTweetsMedia {
    fn photo_url(&self) -> Option<&str> {
        match &self.variant {
            GetTweetsMediaVariant::Photo { url } => Some(url),
            GetTweetsMediaVariant::Video | GetTweetsMediaVariant::Gif => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response_with(ids: &[&str]) -> GetTweetsResponse {
        let data = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "text": format!("post {id}"),
                    "attachments": { "media_keys": [format!("3_{id}")] }
                })
            })
            .collect::<Vec<_>>();
        let media = ids
            .iter()
            .map(|id| {
                json!({
                    "media_key": format!("3_{id}"),
                    "type": "photo",
                    "url": format!("https://pbs.twimg.com/media/{id}.jpg")
                })
            })
            .collect::<Vec<_>>();
        serde_json::from_value(json!({ "data": data, "includes": { "media": media } })).unwrap()
    }

    #[test]
    fn posts_keep_upstream_order() {
        let response = response_with(&["5", "4", "3", "2", "1"]);
        let media = response.includes.unwrap().media;
        let posts = convert_posts(response.data, &media).unwrap();
        let ids: Vec<_> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["5", "4", "3", "2", "1"]);
        assert_eq!(
            posts[0].media_url.as_str(),
            "https://pbs.twimg.com/media/5.jpg"
        );
        assert_eq!(posts[0].raw["text"], "post 5");
    }

    #[test]
    fn only_first_media_key_is_used() {
        let response: GetTweetsResponse = serde_json::from_value(json!({
            "data": [
                { "id": "1", "text": "no media" },
                { "id": "2", "text": "video first", "attachments": { "media_keys": ["7_v", "3_a"] } },
                { "id": "3", "text": "two photos", "attachments": { "media_keys": ["3_b", "3_a"] } }
            ],
            "includes": { "media": [
                { "media_key": "7_v", "type": "video" },
                { "media_key": "3_a", "type": "photo", "url": "https://example.com/a.jpg" },
                { "media_key": "3_b", "type": "photo", "url": "https://example.com/b.jpg" }
            ]}
        }))
        .unwrap();
        let media = response.includes.unwrap().media;
        let posts = convert_posts(response.data, &media).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "3");
        assert_eq!(posts[0].media_url.as_str(), "https://example.com/b.jpg");
    }

    #[test]
    fn error_payloads_are_rejected() {
        let body = r#"{"errors":[{"message":"Not Found"}]}"#;
        assert!(parse_body::<GetTweetsResponse>(200, body).is_err());
        assert!(parse_body::<GetTweetsResponse>(401, "{}").is_err());
        assert!(parse_body::<GetTweetsResponse>(200, "not json").is_err());
        let ok = parse_body::<GetTweetsResponse>(200, r#"{"data":[]}"#).unwrap();
        assert!(ok.data.is_empty());
        let ok = parse_body::<GetTweetsResponse>(200, r#"{"meta":{"result_count":0}}"#).unwrap();
        assert!(ok.data.is_empty());
    }

    #[test]
    fn partial_errors_keep_the_data() {
        let body = json!({
            "data": [
                { "id": "9", "text": "kept", "attachments": { "media_keys": ["3_9"] } }
            ],
            "includes": { "media": [
                { "media_key": "3_9", "type": "photo", "url": "https://pbs.twimg.com/media/9.jpg" }
            ]},
            "errors": [{
                "title": "Authorization Error",
                "detail": "Sorry, you are not authorized to see the Tweet with referenced_tweets.id: [1].",
                "type": "https://api.twitter.com/2/problems/not-authorized-for-resource"
            }]
        });
        let response = parse_body::<GetTweetsResponse>(200, &body.to_string()).unwrap();
        let media = response.includes.unwrap().media;
        let posts = convert_posts(response.data, &media).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "9");
    }
}
