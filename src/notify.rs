use anyhow::{bail, Context};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use std::env;

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Posts a structured run outcome somewhere humans will see it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns the HTTP status of the post.
    async fn post(&self, message: &serde_json::Value) -> anyhow::Result<u16>;
}

pub struct SlackBot {
    client: Client,
    token: String,
    channel: String,
    name: String,
}

impl SlackBot {
    pub fn new(token: String, channel: String, name: String) -> Self {
        Self {
            client: Client::new(),
            token,
            channel,
            name,
        }
    }

    /// Reads `SLACK_API_TOKEN` and `SLACK_CHANNEL_ID`. Messages are prefixed with `name`.
    pub fn from_env(name: &str) -> anyhow::Result<Self> {
        let token = env::var("SLACK_API_TOKEN").context("SLACK_API_TOKEN is not set")?;
        let channel = env::var("SLACK_CHANNEL_ID").context("SLACK_CHANNEL_ID is not set")?;
        Ok(Self::new(token, channel, name.to_string()))
    }

    fn text(&self, message: &serde_json::Value) -> String {
        format!("{}: {}", self.name, message)
    }
}

#[async_trait]
impl Notifier for SlackBot {
    async fn post(&self, message: &serde_json::Value) -> anyhow::Result<u16> {
        let text = self.text(message);
        let form = [
            ("token", self.token.as_str()),
            ("channel", self.channel.as_str()),
            ("as_user", "true"),
            ("text", text.as_str()),
        ];
        let response = self.client.post(POST_MESSAGE_URL).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("Server response: {}", body);
        if !status.is_success() {
            bail!("Notification rejected with {}: {}", status, body);
        }
        info!("Posted notification to channel {}", self.channel);
        Ok(status.as_u16())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Records every message; optionally fails every post.
    #[derive(Default)]
    pub(crate) struct FakeNotifier {
        pub messages: Mutex<Vec<serde_json::Value>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Notifier for Arc<FakeNotifier> {
        async fn post(&self, message: &serde_json::Value) -> anyhow::Result<u16> {
            self.messages.lock().unwrap().push(message.clone());
            if self.fail {
                bail!("channel unavailable");
            }
            Ok(200)
        }
    }

    #[test]
    fn message_is_prefixed_with_pipeline_name() {
        let bot = SlackBot::new("xoxb".into(), "C123".into(), "beautiful-s2-prod".into());
        assert_eq!(
            bot.text(&json!({"scraped": 3})),
            r#"beautiful-s2-prod: {"scraped":3}"#
        );
    }
}
