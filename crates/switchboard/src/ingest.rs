//! Inbound gateway events into the relay.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use switchboard_discord::{GatewayEvent, InboundMessage};
use switchboard_relay::Relay;

use crate::commands::Command;

/// Applies gateway events to the relay and answers chat commands.
pub struct Ingest {
    relay: Relay,
    prefix: String,
    /// The bot's own user id, known after READY.
    self_id: Option<String>,
}

impl Ingest {
    pub fn new(relay: Relay, prefix: impl Into<String>) -> Self {
        Self {
            relay,
            prefix: prefix.into(),
            self_id: None,
        }
    }

    /// Consume events until the gateway side hangs up.
    pub async fn run(mut self, mut events: mpsc::Receiver<GatewayEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("gateway event stream closed");
    }

    pub async fn handle(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready {
                user_id,
                username,
                guild_count,
            } => {
                info!(user_id = %user_id, username = %username, guild_count, "bot is online");
                self.self_id = Some(user_id);
            }
            GatewayEvent::MessageCreate(inbound) => self.handle_message(inbound).await,
        }
    }

    async fn handle_message(&self, inbound: InboundMessage) {
        if self.self_id.as_deref() == Some(inbound.author_id.as_str()) {
            trace!(message_id = %inbound.message.id, "ignoring own message");
            return;
        }

        info!(
            author = %inbound.message.author,
            channel_id = %inbound.message.channel_id,
            "received message"
        );

        // Other bots' messages are recorded but never trigger commands.
        let command = if inbound.author_is_bot {
            None
        } else {
            Command::parse(&self.prefix, &inbound.message.content)
        };
        let channel_id = inbound.message.channel_id.clone();

        self.relay.history().append(inbound.message).await;

        if let Some(command) = command {
            debug!(?command, channel_id = %channel_id, "answering command");
            let reply = command.reply(&self.prefix);
            let gateway = Arc::clone(self.relay.gateway());
            tokio::spawn(async move {
                if let Err(e) = gateway.send(&channel_id, &reply).await {
                    error!(channel_id = %channel_id, error = %e, "failed to answer command");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use switchboard_discord::{ChannelSummary, ChatGateway, DiscordError, GuildSummary, Message};
    use switchboard_relay::RelayConfig;
    use tempfile::TempDir;
    use tokio::sync::watch;

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatGateway for RecordingGateway {
        async fn fetch_recent(&self, _: &str, _: usize) -> Result<Vec<Message>, DiscordError> {
            Ok(vec![])
        }

        async fn fetch_after(&self, _: &str, _: &str, _: usize) -> Result<Vec<Message>, DiscordError> {
            Ok(vec![])
        }

        async fn send(&self, channel_id: &str, content: &str) -> Result<(), DiscordError> {
            self.sent
                .lock()
                .unwrap()
                .push((channel_id.to_string(), content.to_string()));
            Ok(())
        }

        async fn list_guilds(&self) -> Result<Vec<GuildSummary>, DiscordError> {
            Ok(vec![])
        }

        async fn list_channels(&self, guild_id: &str) -> Result<Vec<ChannelSummary>, DiscordError> {
            Err(DiscordError::NotFound(guild_id.to_string()))
        }

        async fn find_channel(&self, _: &str) -> Result<Option<ChannelSummary>, DiscordError> {
            Ok(None)
        }
    }

    fn inbound(id: &str, author_id: &str, content: &str, is_bot: bool) -> GatewayEvent {
        GatewayEvent::MessageCreate(InboundMessage {
            message: Message {
                id: id.to_string(),
                author: "ada".to_string(),
                content: content.to_string(),
                timestamp: "2024-05-01T12:00:00+00:00".to_string(),
                channel_id: "c1".to_string(),
                channel_name: "general".to_string(),
                guild_id: Some("g1".to_string()),
                guild_name: Some("Rustaceans".to_string()),
                attachments: vec![],
            },
            author_id: author_id.to_string(),
            author_is_bot: is_bot,
        })
    }

    fn ready() -> GatewayEvent {
        GatewayEvent::Ready {
            user_id: "bot".to_string(),
            username: "switchboard".to_string(),
            guild_count: 1,
        }
    }

    struct Harness {
        ingest: Ingest,
        relay: Relay,
        gateway: Arc<RecordingGateway>,
        _shutdown: watch::Sender<bool>,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let gateway = Arc::new(RecordingGateway::default());
        let config = RelayConfig {
            history_path: dir.path().join("messages.json"),
            ..RelayConfig::default()
        };
        let relay = Relay::open(
            config,
            Arc::clone(&gateway) as Arc<dyn ChatGateway>,
            shutdown_rx,
        )
        .await;

        Harness {
            ingest: Ingest::new(relay.clone(), "!"),
            relay,
            gateway,
            _shutdown: shutdown_tx,
            _dir: dir,
        }
    }

    async fn sent(gateway: &RecordingGateway, expected: usize) -> Vec<(String, String)> {
        for _ in 0..50 {
            if gateway.sent.lock().unwrap().len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        gateway.sent.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_messages_are_appended_in_order() {
        let mut h = harness().await;
        h.ingest.handle(ready()).await;
        h.ingest.handle(inbound("1", "u1", "hello", false)).await;
        h.ingest.handle(inbound("2", "u2", "there", false)).await;

        let ids: Vec<String> = h
            .relay
            .history()
            .snapshot()
            .await
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let mut h = harness().await;
        h.ingest.handle(ready()).await;
        h.ingest.handle(inbound("1", "bot", "Pong!", true)).await;

        assert!(h.relay.history().is_empty().await);
    }

    #[tokio::test]
    async fn test_ping_is_answered_after_append() {
        let mut h = harness().await;
        h.ingest.handle(ready()).await;
        h.ingest.handle(inbound("1", "u1", "!ping", false)).await;

        assert_eq!(h.relay.history().len().await, 1);
        assert_eq!(
            sent(&h.gateway, 1).await,
            vec![("c1".to_string(), "Pong!".to_string())]
        );
    }

    #[tokio::test]
    async fn test_other_bots_are_recorded_but_not_answered() {
        let mut h = harness().await;
        h.ingest.handle(ready()).await;
        h.ingest.handle(inbound("1", "other-bot", "!ping", true)).await;

        assert_eq!(h.relay.history().len().await, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.gateway.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let h = harness().await;
        let (tx, rx) = mpsc::channel(8);
        tx.send(ready()).await.unwrap();
        tx.send(inbound("1", "u1", "hi", false)).await.unwrap();
        drop(tx);

        h.ingest.run(rx).await;
        assert_eq!(h.relay.history().len().await, 1);
    }
}
