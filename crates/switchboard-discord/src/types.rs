//! Message model and Discord wire types.

use serde::{Deserialize, Serialize};

/// Text channel types listed to the dashboard (`GUILD_TEXT`, `GUILD_ANNOUNCEMENT`).
pub const TEXT_CHANNEL_TYPES: &[u8] = &[0, 5];

/// A relayed chat message.
///
/// Immutable once built. `timestamp` is kept as the ISO-8601 string Discord
/// sent so it round-trips byte-for-byte through the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author: String,
    pub content: String,
    pub timestamp: String,
    pub channel_id: String,
    pub channel_name: String,
    pub guild_id: Option<String>,
    pub guild_name: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A guild the bot is a member of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSummary {
    pub id: String,
    pub name: String,
    /// CDN URL of the guild icon.
    pub icon: Option<String>,
}

/// A text channel inside a guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip)]
    pub guild_id: Option<String>,
}

/// Channel/guild names attached to a message when it enters the relay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelContext {
    pub channel_name: String,
    pub guild_id: Option<String>,
    pub guild_name: Option<String>,
}

// =============================================================================
// Discord wire types
// =============================================================================

/// Discord user object (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl DiscordUser {
    /// `name`, or `name#1234` for accounts that still carry a discriminator.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }
}

/// Discord attachment object (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordAttachment {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Discord message object, as returned by REST and `MESSAGE_CREATE`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    /// Only present on gateway dispatches.
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: DiscordUser,
    #[serde(default)]
    pub content: String,
    pub timestamp: String,
    #[serde(default)]
    pub attachments: Vec<DiscordAttachment>,
}

impl DiscordMessage {
    /// Build the relay model, using `context` for names Discord omits.
    pub fn into_message(self, context: ChannelContext) -> Message {
        Message {
            id: self.id,
            author: self.author.tag(),
            content: self.content,
            timestamp: self.timestamp,
            channel_id: self.channel_id,
            channel_name: context.channel_name,
            guild_id: context.guild_id.or(self.guild_id),
            guild_name: context.guild_name,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    url: a.url,
                    filename: a.filename,
                    content_type: a.content_type,
                    size: a.size,
                })
                .collect(),
        }
    }

    /// Snowflake ids sort numerically in creation order.
    pub fn snowflake(&self) -> u64 {
        self.id.parse().unwrap_or(0)
    }
}

/// Discord channel object (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordChannel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
}

/// Discord guild object as delivered by `GUILD_CREATE` / `GUILD_UPDATE`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordGuild {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub channels: Vec<DiscordChannel>,
}

/// Discord's JSON error body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DiscordErrorBody {
    #[serde(default)]
    pub code: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub retry_after: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(discriminator: Option<&str>) -> DiscordUser {
        DiscordUser {
            id: "1".to_string(),
            username: "ada".to_string(),
            discriminator: discriminator.map(String::from),
            bot: false,
        }
    }

    #[test]
    fn test_tag_without_discriminator() {
        assert_eq!(user(None).tag(), "ada");
        assert_eq!(user(Some("0")).tag(), "ada");
    }

    #[test]
    fn test_tag_with_legacy_discriminator() {
        assert_eq!(user(Some("0420")).tag(), "ada#0420");
    }

    #[test]
    fn test_parse_rest_message_and_convert() {
        let json = r#"{
            "id": "1200000000000000001",
            "channel_id": "42",
            "author": {"id": "7", "username": "ada", "discriminator": "0"},
            "content": "hello",
            "timestamp": "2024-05-01T12:00:00.123000+00:00",
            "attachments": [
                {"id": "9", "url": "https://cdn.example/a.png", "filename": "a.png",
                 "content_type": "image/png", "size": 1024}
            ]
        }"#;

        let raw: DiscordMessage = serde_json::from_str(json).unwrap();
        assert_eq!(raw.snowflake(), 1200000000000000001);

        let msg = raw.into_message(ChannelContext {
            channel_name: "general".to_string(),
            guild_id: Some("5".to_string()),
            guild_name: Some("Guild".to_string()),
        });
        assert_eq!(msg.author, "ada");
        assert_eq!(msg.channel_name, "general");
        assert_eq!(msg.guild_id.as_deref(), Some("5"));
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].size, Some(1024));
    }

    #[test]
    fn test_message_serializes_null_guild() {
        let msg = Message {
            id: "1".to_string(),
            author: "ada".to_string(),
            content: "hi".to_string(),
            timestamp: "2024-05-01T12:00:00+00:00".to_string(),
            channel_id: "42".to_string(),
            channel_name: "42".to_string(),
            guild_id: None,
            guild_name: None,
            attachments: vec![],
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert!(json["guild_id"].is_null());
        assert!(json["guild_name"].is_null());
        assert_eq!(json["attachments"], serde_json::json!([]));
    }

    #[test]
    fn test_channel_summary_serializes_type() {
        let channel = ChannelSummary {
            id: "42".to_string(),
            name: "general".to_string(),
            kind: "text".to_string(),
            guild_id: Some("5".to_string()),
        };
        let json = serde_json::to_value(&channel).unwrap();
        assert_eq!(json["type"], "text");
        assert!(json.get("guild_id").is_none());
    }
}
