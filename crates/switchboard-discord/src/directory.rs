//! In-memory registry of guilds and their text channels.
//!
//! Populated from gateway dispatches, read by the web layer. Lives for the
//! whole process; entries only disappear when Discord says so.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::types::{
    ChannelContext, ChannelSummary, DiscordChannel, DiscordGuild, GuildSummary, TEXT_CHANNEL_TYPES,
};

const ICON_CDN: &str = "https://cdn.discordapp.com/icons";

#[derive(Debug, Clone)]
struct GuildEntry {
    name: String,
    icon: Option<String>,
    channels: BTreeMap<String, ChannelEntry>,
}

#[derive(Debug, Clone)]
struct ChannelEntry {
    name: String,
    position: i64,
}

/// Thread-safe guild/channel directory.
#[derive(Debug, Default)]
pub struct GuildDirectory {
    guilds: DashMap<String, GuildEntry>,
    /// channel id -> guild id
    channel_guild: DashMap<String, String>,
}

impl GuildDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a guild from a full `GUILD_CREATE` payload.
    pub fn upsert_guild(&self, guild: &DiscordGuild) {
        if guild.unavailable {
            trace!(guild_id = %guild.id, "skipping unavailable guild");
            return;
        }

        let mut channels = BTreeMap::new();
        for channel in &guild.channels {
            if let Some(entry) = text_channel_entry(channel) {
                self.channel_guild
                    .insert(channel.id.clone(), guild.id.clone());
                channels.insert(channel.id.clone(), entry);
            }
        }

        debug!(
            guild_id = %guild.id,
            channels = channels.len(),
            "directory: guild registered"
        );

        self.guilds.insert(
            guild.id.clone(),
            GuildEntry {
                name: guild.name.clone().unwrap_or_default(),
                icon: guild.icon.clone(),
                channels,
            },
        );
    }

    /// Apply a `GUILD_UPDATE`, which carries no channel list.
    pub fn update_guild(&self, guild: &DiscordGuild) {
        match self.guilds.get_mut(&guild.id) {
            Some(mut entry) => {
                if let Some(name) = &guild.name {
                    entry.name = name.clone();
                }
                entry.icon = guild.icon.clone();
            }
            None => self.upsert_guild(guild),
        }
    }

    /// Forget a guild and all its channels.
    pub fn remove_guild(&self, guild_id: &str) {
        if let Some((_, entry)) = self.guilds.remove(guild_id) {
            for channel_id in entry.channels.keys() {
                self.channel_guild.remove(channel_id);
            }
            debug!(guild_id = %guild_id, "directory: guild removed");
        }
    }

    /// Apply `CHANNEL_CREATE` / `CHANNEL_UPDATE`.
    pub fn upsert_channel(&self, channel: &DiscordChannel) {
        let Some(guild_id) = channel.guild_id.as_deref() else {
            return;
        };

        // A channel converted away from text stops being listed.
        let Some(entry) = text_channel_entry(channel) else {
            self.remove_channel(&channel.id);
            return;
        };

        if let Some(mut guild) = self.guilds.get_mut(guild_id) {
            guild.channels.insert(channel.id.clone(), entry);
            self.channel_guild
                .insert(channel.id.clone(), guild_id.to_string());
        }
    }

    /// Apply `CHANNEL_DELETE`.
    pub fn remove_channel(&self, channel_id: &str) {
        if let Some((_, guild_id)) = self.channel_guild.remove(channel_id) {
            if let Some(mut guild) = self.guilds.get_mut(&guild_id) {
                guild.channels.remove(channel_id);
            }
        }
    }

    /// All known guilds, sorted by name.
    pub fn guilds(&self) -> Vec<GuildSummary> {
        let mut guilds: Vec<GuildSummary> = self
            .guilds
            .iter()
            .map(|entry| GuildSummary {
                id: entry.key().clone(),
                name: entry.name.clone(),
                icon: entry
                    .icon
                    .as_ref()
                    .map(|hash| format!("{}/{}/{}.png", ICON_CDN, entry.key(), hash)),
            })
            .collect();
        guilds.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        guilds
    }

    /// Text channels of a guild in display order, or `None` for an unknown guild.
    pub fn channels(&self, guild_id: &str) -> Option<Vec<ChannelSummary>> {
        let guild = self.guilds.get(guild_id)?;
        let mut channels: Vec<(i64, ChannelSummary)> = guild
            .channels
            .iter()
            .map(|(id, entry)| {
                (
                    entry.position,
                    ChannelSummary {
                        id: id.clone(),
                        name: entry.name.clone(),
                        kind: "text".to_string(),
                        guild_id: Some(guild_id.to_string()),
                    },
                )
            })
            .collect();
        channels.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Some(channels.into_iter().map(|(_, c)| c).collect())
    }

    /// Look up a single text channel.
    pub fn channel(&self, channel_id: &str) -> Option<ChannelSummary> {
        let guild_id = self.channel_guild.get(channel_id)?.clone();
        let guild = self.guilds.get(&guild_id)?;
        let entry = guild.channels.get(channel_id)?;
        Some(ChannelSummary {
            id: channel_id.to_string(),
            name: entry.name.clone(),
            kind: "text".to_string(),
            guild_id: Some(guild_id.clone()),
        })
    }

    /// Names to stamp on a message from `channel_id`.
    ///
    /// Unknown channels (direct messages, channels we lost track of) fall back
    /// to the channel id as name and no guild.
    pub fn context_for(&self, channel_id: &str) -> ChannelContext {
        let Some(guild_id) = self.channel_guild.get(channel_id).map(|g| g.clone()) else {
            return ChannelContext {
                channel_name: channel_id.to_string(),
                guild_id: None,
                guild_name: None,
            };
        };

        match self.guilds.get(&guild_id) {
            Some(guild) => ChannelContext {
                channel_name: guild
                    .channels
                    .get(channel_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| channel_id.to_string()),
                guild_id: Some(guild_id.clone()),
                guild_name: Some(guild.name.clone()),
            },
            None => ChannelContext {
                channel_name: channel_id.to_string(),
                guild_id: Some(guild_id),
                guild_name: None,
            },
        }
    }

    /// Number of known guilds.
    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }
}

fn text_channel_entry(channel: &DiscordChannel) -> Option<ChannelEntry> {
    if !TEXT_CHANNEL_TYPES.contains(&channel.kind) {
        return None;
    }
    Some(ChannelEntry {
        name: channel.name.clone().unwrap_or_default(),
        position: channel.position.unwrap_or(0),
    })
}
