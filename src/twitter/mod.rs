pub mod v2;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

#[derive(Deserialize)]
pub struct Authentication {
    pub bearer_token: String,
}

/// A post whose first attached image has been resolved to a URL.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: String,
    pub text: String,
    pub media_url: Url,
    /// The post object exactly as the API returned it
    pub raw: serde_json::Value,
}

/// Shared options for timeline and search requests.
#[derive(Debug, Clone)]
pub struct PostQuery {
    pub max_results: u32,
    pub tweet_fields: Vec<String>,
}

#[async_trait]
pub trait TwitterClient: Send + Sync {
    /// Most recent posts authored by `user_id`, newest first.
    async fn get_tweets_for_user(
        &self,
        user_id: &str,
        query: &PostQuery,
    ) -> anyhow::Result<Vec<Post>>;

    /// Most recent posts matching a search expression, newest first.
    async fn search_recent(&self, search: &str, query: &PostQuery) -> anyhow::Result<Vec<Post>>;
}
