//! Alert sinks
//!
//! `LogSink` writes alerts to the tracing log. `SlackSink` posts them to every
//! Slack channel the bot is a member of.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::event::AlertEvent;
use crate::traits::AlertSink;

/// Slack Web API base URL
pub const SLACK_API_URL: &str = "https://slack.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Logs each alert's text at info level
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&mut self, alert: &AlertEvent) -> Result<(), SinkError> {
        info!(value = alert.value, "{}", alert.text);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ConversationsList {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    #[serde(default)]
    is_member: bool,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts alert text to each Slack channel the bot belongs to.
///
/// Channel posts are independent: one failing does not stop or undo the
/// others. The alert counts as failed if any post fails.
pub struct SlackSink {
    http: Client,
    token: String,
    base_url: String,
}

impl SlackSink {
    pub fn new(token: impl Into<String>) -> Result<Self, SinkError> {
        Self::with_base_url(token, SLACK_API_URL)
    }

    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let http = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            token: token.into(),
            base_url: base_url.into(),
        })
    }

    async fn member_channels(&self) -> Result<Vec<String>, SinkError> {
        let url = format!("{}/api/conversations.list", self.base_url);
        debug!(url = %url, "Listing Slack channels");

        let list: ConversationsList = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !list.ok {
            return Err(SinkError::Api(
                list.error.unwrap_or_else(|| "conversations.list failed".to_string()),
            ));
        }

        Ok(list
            .channels
            .into_iter()
            .filter(|c| c.is_member)
            .map(|c| c.id)
            .collect())
    }

    async fn post(&self, channel: &str, text: &str) -> Result<(), SinkError> {
        let url = format!("{}/api/chat.postMessage", self.base_url);
        let body = serde_json::json!({
            "channel": channel,
            "text": text,
        });

        let resp: PostMessageResponse = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if resp.ok {
            Ok(())
        } else {
            Err(SinkError::Api(
                resp.error.unwrap_or_else(|| "chat.postMessage failed".to_string()),
            ))
        }
    }
}

#[async_trait]
impl AlertSink for SlackSink {
    fn name(&self) -> &str {
        "slack"
    }

    async fn publish(&mut self, alert: &AlertEvent) -> Result<(), SinkError> {
        let channels = self.member_channels().await?;

        let mut failed = 0usize;
        for channel in &channels {
            match self.post(channel, &alert.text).await {
                Ok(()) => debug!(channel = %channel, "Posted alert to Slack"),
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Failed to post alert to Slack channel");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(SinkError::Api(format!(
                "{} of {} channel posts failed",
                failed,
                channels.len()
            )));
        }
        Ok(())
    }
}
