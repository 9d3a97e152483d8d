use crate::config::{ComponentConfig, ConfigError};
use crate::download::{HttpMediaFetcher, MediaFetcher};
use crate::model::Record;
use crate::twitter::v2::TwitterClientV2;
use crate::twitter::{Authentication, Post, PostQuery, TwitterClient};
use anyhow::Context;
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use url::Url;

/// Limits accepted by the v2 timeline and recent search endpoints.
const MIN_RESULTS: u32 = 5;
const MAX_RESULTS: u32 = 100;

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Records newest first, at most the configured number of them.
    async fn scrape(&self) -> anyhow::Result<Vec<Record>>;
}

/// How the media URL returned by the API is turned into the URL that gets downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum UrlRewrite {
    #[default]
    Identity,
    /// Ask the media host for a specific rendition, e.g. `?format=jpg&name=4096x4096`
    Render {
        #[serde(default = "default_format")]
        format: String,
        #[serde(default = "default_render_name")]
        name: String,
    },
}

fn default_format() -> String {
    "jpg".to_string()
}

fn default_render_name() -> String {
    "4096x4096".to_string()
}

fn default_max_results() -> u32 {
    10
}

impl UrlRewrite {
    pub fn apply(&self, url: &Url) -> Url {
        match self {
            UrlRewrite::Identity => url.clone(),
            UrlRewrite::Render { format, name } => {
                let mut url = url.clone();
                let path = url.path().to_string();
                let stem_end = match (path.rfind('.'), path.rfind('/')) {
                    (Some(dot), Some(slash)) if dot > slash => dot,
                    (Some(dot), None) => dot,
                    _ => path.len(),
                };
                url.set_path(&path[..stem_end]);
                url.set_query(Some(&format!("format={format}&name={name}")));
                url
            }
        }
    }
}

fn post_query(max_results: u32, tweet_fields: Vec<String>) -> Result<PostQuery, ConfigError> {
    if !(MIN_RESULTS..=MAX_RESULTS).contains(&max_results) {
        return Err(ConfigError::InvalidValue {
            field: "max_results",
            reason: format!("{max_results} is outside {MIN_RESULTS}..={MAX_RESULTS}"),
        });
    }
    Ok(PostQuery {
        max_results,
        tweet_fields,
    })
}

/// Downloads every post's image in order, stopping at the first failure.
async fn fetch_records(
    posts: Vec<Post>,
    rewrite: &UrlRewrite,
    fetcher: &dyn MediaFetcher,
) -> anyhow::Result<Vec<Record>> {
    let mut records = Vec::with_capacity(posts.len());
    for mut post in posts {
        post.media_url = rewrite.apply(&post.media_url);
        let id = post.id.clone();
        let record = Record::fetch(post, fetcher)
            .await
            .with_context(|| format!("Unable to fetch image for tweet {id}"))?;
        records.push(record);
    }
    Ok(records)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserScraperParams {
    #[serde(alias = "TWITTER_API_BEARER_TOKEN")]
    pub bearer_token: String,
    pub user_id: String,
    #[serde(default)]
    pub tweet_fields: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub url_rewrite: UrlRewrite,
}

/// Scrapes a user's timeline for posts with images.
pub struct UserScraper {
    client: Box<dyn TwitterClient>,
    fetcher: Box<dyn MediaFetcher>,
    user_id: String,
    query: PostQuery,
    rewrite: UrlRewrite,
}

impl UserScraper {
    pub fn from_config(component: &ComponentConfig) -> anyhow::Result<Self> {
        let params: UserScraperParams = component.params()?;
        let query = post_query(params.max_results, params.tweet_fields)?;
        let client = TwitterClientV2::new(&Authentication {
            bearer_token: params.bearer_token,
        })?;
        Ok(Self::new(
            Box::new(client),
            Box::new(HttpMediaFetcher::new()?),
            params.user_id,
            query,
            params.url_rewrite,
        ))
    }

    pub fn new(
        client: Box<dyn TwitterClient>,
        fetcher: Box<dyn MediaFetcher>,
        user_id: String,
        query: PostQuery,
        rewrite: UrlRewrite,
    ) -> Self {
        Self {
            client,
            fetcher,
            user_id,
            query,
            rewrite,
        }
    }
}

#[async_trait]
impl Scraper for UserScraper {
    async fn scrape(&self) -> anyhow::Result<Vec<Record>> {
        let posts = self
            .client
            .get_tweets_for_user(&self.user_id, &self.query)
            .await?;
        info!("Found {} tweets with images for {}", posts.len(), self.user_id);
        fetch_records(posts, &self.rewrite, self.fetcher.as_ref()).await
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashtagScraperParams {
    #[serde(alias = "TWITTER_API_BEARER_TOKEN")]
    pub bearer_token: String,
    pub hashtag: String,
    #[serde(default)]
    pub tweet_fields: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub url_rewrite: UrlRewrite,
}

/// Scrapes recent posts carrying a hashtag. Retweets and posts without images
/// are filtered out by the search expression.
pub struct HashtagScraper {
    client: Box<dyn TwitterClient>,
    fetcher: Box<dyn MediaFetcher>,
    search: String,
    query: PostQuery,
    rewrite: UrlRewrite,
}

impl HashtagScraper {
    pub fn from_config(component: &ComponentConfig) -> anyhow::Result<Self> {
        let params: HashtagScraperParams = component.params()?;
        let query = post_query(params.max_results, params.tweet_fields)?;
        let client = TwitterClientV2::new(&Authentication {
            bearer_token: params.bearer_token,
        })?;
        Ok(Self::new(
            Box::new(client),
            Box::new(HttpMediaFetcher::new()?),
            &params.hashtag,
            query,
            params.url_rewrite,
        ))
    }

    pub fn new(
        client: Box<dyn TwitterClient>,
        fetcher: Box<dyn MediaFetcher>,
        hashtag: &str,
        query: PostQuery,
        rewrite: UrlRewrite,
    ) -> Self {
        Self {
            client,
            fetcher,
            search: search_expression(hashtag),
            query,
            rewrite,
        }
    }
}

fn search_expression(hashtag: &str) -> String {
    format!("#{} has:images -is:retweet", hashtag.trim_start_matches('#'))
}

#[async_trait]
impl Scraper for HashtagScraper {
    async fn scrape(&self) -> anyhow::Result<Vec<Record>> {
        let posts = self.client.search_recent(&self.search, &self.query).await?;
        info!("Found {} tweets with images for {}", posts.len(), self.search);
        fetch_records(posts, &self.rewrite, self.fetcher.as_ref()).await
    }
}
