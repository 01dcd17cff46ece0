//! The chat-platform seam the relay depends on.

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::DiscordClient;
use crate::directory::GuildDirectory;
use crate::types::{ChannelSummary, DiscordMessage, GuildSummary, Message};
use crate::DiscordError;

/// Operations the relay needs from the upstream chat platform.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// The newest `limit` messages of a channel, newest first.
    async fn fetch_recent(&self, channel_id: &str, limit: usize)
    -> Result<Vec<Message>, DiscordError>;

    /// Up to `limit` messages created strictly after `after_id`, oldest first.
    async fn fetch_after(
        &self,
        channel_id: &str,
        after_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, DiscordError>;

    /// Post `content` to a channel.
    async fn send(&self, channel_id: &str, content: &str) -> Result<(), DiscordError>;

    /// Guilds the bot can see.
    async fn list_guilds(&self) -> Result<Vec<GuildSummary>, DiscordError>;

    /// Text channels of a guild. Unknown guilds are [`DiscordError::NotFound`].
    async fn list_channels(&self, guild_id: &str) -> Result<Vec<ChannelSummary>, DiscordError>;

    /// Look up a text channel by id.
    async fn find_channel(&self, channel_id: &str) -> Result<Option<ChannelSummary>, DiscordError>;
}

/// [`ChatGateway`] backed by the Discord REST API and the gateway-fed directory.
#[derive(Debug, Clone)]
pub struct DiscordAdapter {
    client: DiscordClient,
    directory: Arc<GuildDirectory>,
}

impl DiscordAdapter {
    pub fn new(client: DiscordClient, directory: Arc<GuildDirectory>) -> Self {
        Self { client, directory }
    }

    fn convert(&self, raw: Vec<DiscordMessage>) -> Vec<Message> {
        raw.into_iter()
            .map(|m| {
                let context = self.directory.context_for(&m.channel_id);
                m.into_message(context)
            })
            .collect()
    }
}

#[async_trait]
impl ChatGateway for DiscordAdapter {
    async fn fetch_recent(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, DiscordError> {
        let mut raw = self.client.channel_messages(channel_id, limit, None).await?;
        raw.sort_by_key(|m| std::cmp::Reverse(m.snowflake()));
        Ok(self.convert(raw))
    }

    async fn fetch_after(
        &self,
        channel_id: &str,
        after_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, DiscordError> {
        let mut raw = self
            .client
            .channel_messages(channel_id, limit, Some(after_id))
            .await?;
        raw.sort_by_key(DiscordMessage::snowflake);
        Ok(self.convert(raw))
    }

    async fn send(&self, channel_id: &str, content: &str) -> Result<(), DiscordError> {
        self.client.create_message(channel_id, content).await?;
        Ok(())
    }

    async fn list_guilds(&self) -> Result<Vec<GuildSummary>, DiscordError> {
        Ok(self.directory.guilds())
    }

    async fn list_channels(&self, guild_id: &str) -> Result<Vec<ChannelSummary>, DiscordError> {
        self.directory
            .channels(guild_id)
            .ok_or_else(|| DiscordError::NotFound(format!("guild {}", guild_id)))
    }

    async fn find_channel(&self, channel_id: &str) -> Result<Option<ChannelSummary>, DiscordError> {
        Ok(self.directory.channel(channel_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiscordChannel, DiscordGuild};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message_json(id: &str, second: u32) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "channel_id": "c1",
            "author": {"id": "7", "username": "ada"},
            "content": "hi",
            "timestamp": format!("2024-05-01T12:00:{:02}+00:00", second),
        })
    }

    fn directory() -> Arc<GuildDirectory> {
        let dir = GuildDirectory::new();
        dir.upsert_guild(&DiscordGuild {
            id: "g1".to_string(),
            name: Some("Rustaceans".to_string()),
            icon: None,
            unavailable: false,
            channels: vec![DiscordChannel {
                id: "c1".to_string(),
                kind: 0,
                guild_id: Some("g1".to_string()),
                name: Some("general".to_string()),
                position: Some(0),
            }],
        });
        Arc::new(dir)
    }

    #[tokio::test]
    async fn test_fetch_after_is_oldest_first_and_enriched() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/channels/c1/messages"))
            .and(query_param("after", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                message_json("12", 12),
                message_json("11", 11),
            ])))
            .mount(&mock_server)
            .await;

        let client = DiscordClient::new(mock_server.uri(), "t").unwrap();
        let adapter = DiscordAdapter::new(client, directory());

        let messages = adapter.fetch_after("c1", "10", 50).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["11", "12"]);
        assert_eq!(messages[0].channel_name, "general");
        assert_eq!(messages[0].guild_name.as_deref(), Some("Rustaceans"));
    }

    #[tokio::test]
    async fn test_fetch_recent_is_newest_first() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/channels/c1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                message_json("1", 1),
                message_json("3", 3),
                message_json("2", 2),
            ])))
            .mount(&mock_server)
            .await;

        let client = DiscordClient::new(mock_server.uri(), "t").unwrap();
        let adapter = DiscordAdapter::new(client, directory());

        let messages = adapter.fetch_recent("c1", 10).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
    }

    #[tokio::test]
    async fn test_list_channels_unknown_guild() {
        let client = DiscordClient::new("http://localhost:1", "t").unwrap();
        let adapter = DiscordAdapter::new(client, directory());

        let err = adapter.list_channels("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(adapter.list_channels("g1").await.unwrap().len(), 1);
    }
}
