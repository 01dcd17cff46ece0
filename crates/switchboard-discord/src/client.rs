//! Discord REST client.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::DiscordError;
use crate::types::{DiscordErrorBody, DiscordMessage};

/// Default REST API base.
pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

/// Discord caps a single history page at 100 messages.
const MAX_PAGE_SIZE: usize = 100;

/// Client for the subset of the Discord REST API the relay needs.
#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
    api_url: String,
    token: String,
}

impl std::fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl DiscordClient {
    /// Create a client for `api_url` authenticating as a bot with `token`.
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, DiscordError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .user_agent(concat!(
                "DiscordBot (https://github.com/switchboard-rs/switchboard, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Fetch a page of channel history.
    ///
    /// Without `after`, Discord returns the newest `limit` messages. With
    /// `after`, it returns up to `limit` messages created after that id.
    /// Discord orders both newest-first.
    pub async fn channel_messages(
        &self,
        channel_id: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<Vec<DiscordMessage>, DiscordError> {
        let url = format!("{}/channels/{}/messages", self.api_url, channel_id);
        let limit = limit.clamp(1, MAX_PAGE_SIZE).to_string();

        let mut query = vec![("limit", limit.as_str())];
        if let Some(after) = after {
            query.push(("after", after));
        }

        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header())
            .query(&query)
            .send()
            .await?;

        let response = check_response(response, &format!("channel {}", channel_id)).await?;
        let messages: Vec<DiscordMessage> = response.json().await?;

        debug!(
            channel_id = %channel_id,
            after = ?after,
            count = messages.len(),
            "fetched channel messages"
        );

        Ok(messages)
    }

    /// Post a message to a channel.
    pub async fn create_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<DiscordMessage, DiscordError> {
        #[derive(Serialize)]
        struct CreateMessage<'a> {
            content: &'a str,
        }

        let url = format!("{}/channels/{}/messages", self.api_url, channel_id);

        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&CreateMessage { content })
            .send()
            .await?;

        let response = check_response(response, &format!("channel {}", channel_id)).await?;
        let message: DiscordMessage = response.json().await?;

        debug!(channel_id = %channel_id, message_id = %message.id, "message sent");

        Ok(message)
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }
}

/// Map non-success statuses to [`DiscordError`].
async fn check_response(response: Response, subject: &str) -> Result<Response, DiscordError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: Option<DiscordErrorBody> = serde_json::from_str(&text).ok();
    let message = body
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| text.clone());

    match status {
        StatusCode::NOT_FOUND => Err(DiscordError::NotFound(subject.to_string())),
        StatusCode::UNAUTHORIZED => Err(DiscordError::Auth(message)),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = body.and_then(|b| b.retry_after);
            warn!(subject = %subject, retry_after = ?retry_after_secs, "rate limited by Discord");
            Err(DiscordError::RateLimited { retry_after_secs })
        }
        _ => Err(DiscordError::Api {
            status: status.as_u16(),
            code: body.and_then(|b| b.code),
            message,
        }),
    }
}
