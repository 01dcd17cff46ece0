//! Discord gateway (websocket) client.
//!
//! Keeps one bot session open, feeds the [`GuildDirectory`] from guild and
//! channel dispatches, and forwards inbound messages to the caller over an
//! mpsc channel. Every reconnect identifies afresh; sessions are not resumed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, trace, warn};

use crate::directory::GuildDirectory;
use crate::types::{DiscordChannel, DiscordGuild, DiscordMessage, Message};
use crate::DiscordError;

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
pub const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close codes after which reconnecting cannot succeed.
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BACKOFF_SECS: u64 = 60;

/// Events surfaced to the caller.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Session established.
    Ready {
        user_id: String,
        username: String,
        guild_count: usize,
    },
    /// A message was posted somewhere the bot can see.
    MessageCreate(InboundMessage),
}

/// A freshly posted message plus the author facts the relay model drops.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message: Message,
    pub author_id: String,
    pub author_is_bot: bool,
}

/// What the connection loop should do after a payload.
#[derive(Debug)]
enum Action {
    Nothing,
    Emit(GatewayEvent),
    HeartbeatNow,
    Reconnect(&'static str),
}

#[derive(Debug, Default)]
struct Session {
    /// Last dispatch sequence number.
    seq: Option<u64>,
    /// Heartbeat sent, ACK not yet received.
    ack_pending: bool,
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct Ready {
    user: ReadyUser,
    #[serde(default)]
    guilds: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ReadyUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct GuildDelete {
    id: String,
    #[serde(default)]
    unavailable: bool,
}

/// Gateway websocket client.
pub struct GatewayClient {
    url: String,
    token: String,
    directory: Arc<GuildDirectory>,
}

impl GatewayClient {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        directory: Arc<GuildDirectory>,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            directory,
        }
    }

    /// Connect and deliver events until shutdown.
    ///
    /// Runs in a reconnection loop with exponential backoff. Returns an error
    /// only when Discord rejects the session for good (bad token, bad intents).
    pub async fn run(
        &self,
        events: mpsc::Sender<GatewayEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), DiscordError> {
        let mut backoff_secs = 1u64;

        loop {
            if *shutdown_rx.borrow() {
                info!("gateway client shutting down");
                return Ok(());
            }

            info!(url = %self.url, "connecting to Discord gateway");

            match self
                .connect_and_process(&events, &mut shutdown_rx, &mut backoff_secs)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e @ DiscordError::Auth(_)) => {
                    error!(error = %e, "gateway rejected the session, giving up");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, backoff_secs, "gateway connection error, reconnecting");

                    let wait = Duration::from_secs(backoff_secs);
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return Ok(());
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }

                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    }

    /// One websocket session: HELLO, IDENTIFY, then heartbeat + dispatch loop.
    async fn connect_and_process(
        &self,
        events: &mpsc::Sender<GatewayEvent>,
        shutdown_rx: &mut watch::Receiver<bool>,
        backoff_secs: &mut u64,
    ) -> Result<(), DiscordError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| DiscordError::WebSocket(format!("connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();

        let hello = match tokio::time::timeout(HELLO_TIMEOUT, read.next()).await {
            Ok(Some(Ok(WsMessage::Text(text)))) => parse_hello(&text)?,
            Ok(Some(Ok(other))) => {
                return Err(DiscordError::InvalidResponse(format!(
                    "expected HELLO, got {:?}",
                    other
                )));
            }
            Ok(Some(Err(e))) => return Err(DiscordError::WebSocket(format!("read error: {}", e))),
            Ok(None) => return Err(DiscordError::WebSocket("stream ended".to_string())),
            Err(_) => return Err(DiscordError::WebSocket("timed out waiting for HELLO".to_string())),
        };

        write
            .send(WsMessage::Text(self.identify_payload().to_string()))
            .await
            .map_err(|e| DiscordError::WebSocket(format!("identify failed: {}", e)))?;

        info!(heartbeat_ms = hello.heartbeat_interval, "gateway connected, identified");
        *backoff_secs = 1;

        let period = Duration::from_millis(hello.heartbeat_interval.max(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period / 2, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut session = Session::default();

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("gateway received shutdown signal");
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Ok(());
                    }
                }

                _ = heartbeat.tick() => {
                    if session.ack_pending {
                        return Err(DiscordError::WebSocket("heartbeat not acknowledged".to_string()));
                    }
                    send_heartbeat(&mut write, &mut session).await?;
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match self.handle_payload(&text, &mut session) {
                                Ok(Action::Nothing) => {}
                                Ok(Action::Emit(event)) => {
                                    if events.send(event).await.is_err() {
                                        info!("event receiver dropped, closing gateway session");
                                        let _ = write.send(WsMessage::Close(None)).await;
                                        return Ok(());
                                    }
                                }
                                Ok(Action::HeartbeatNow) => {
                                    send_heartbeat(&mut write, &mut session).await?;
                                }
                                Ok(Action::Reconnect(reason)) => {
                                    return Err(DiscordError::WebSocket(reason.to_string()));
                                }
                                Err(e) => {
                                    warn!(error = %e, "failed to handle gateway payload");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            let reason = frame
                                .as_ref()
                                .map(|f| f.reason.to_string())
                                .unwrap_or_default();
                            info!(code = ?code, reason = %reason, "gateway closed by server");

                            if let Some(code) = code.filter(|c| FATAL_CLOSE_CODES.contains(c)) {
                                return Err(DiscordError::Auth(format!(
                                    "gateway closed with {}: {}",
                                    code, reason
                                )));
                            }
                            return Err(DiscordError::WebSocket("connection closed".to_string()));
                        }
                        Some(Ok(_)) => {
                            trace!("ignoring non-text gateway frame");
                        }
                        Some(Err(e)) => {
                            return Err(DiscordError::WebSocket(format!("read error: {}", e)));
                        }
                        None => {
                            return Err(DiscordError::WebSocket("stream ended".to_string()));
                        }
                    }
                }
            }
        }
    }

    fn identify_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "switchboard",
                    "device": "switchboard"
                }
            }
        })
    }

    /// Decode one gateway payload and update session/directory state.
    fn handle_payload(&self, text: &str, session: &mut Session) -> Result<Action, DiscordError> {
        let payload: GatewayPayload = serde_json::from_str(text)?;

        match payload.op {
            OP_DISPATCH => {
                if let Some(seq) = payload.s {
                    session.seq = Some(seq);
                }
                let Some(kind) = payload.t else {
                    return Ok(Action::Nothing);
                };
                self.handle_dispatch(&kind, payload.d)
            }
            OP_HEARTBEAT => Ok(Action::HeartbeatNow),
            OP_HEARTBEAT_ACK => {
                session.ack_pending = false;
                Ok(Action::Nothing)
            }
            OP_RECONNECT => Ok(Action::Reconnect("server requested reconnect")),
            OP_INVALID_SESSION => Ok(Action::Reconnect("session invalidated")),
            OP_HELLO => Ok(Action::Nothing),
            op => {
                trace!(op, "ignoring unknown gateway opcode");
                Ok(Action::Nothing)
            }
        }
    }

    fn handle_dispatch(&self, kind: &str, data: serde_json::Value) -> Result<Action, DiscordError> {
        match kind {
            "READY" => {
                let ready: Ready = serde_json::from_value(data)?;
                info!(
                    user = %ready.user.username,
                    guilds = ready.guilds.len(),
                    "gateway session ready"
                );
                Ok(Action::Emit(GatewayEvent::Ready {
                    user_id: ready.user.id,
                    username: ready.user.username,
                    guild_count: ready.guilds.len(),
                }))
            }
            "GUILD_CREATE" => {
                let guild: DiscordGuild = serde_json::from_value(data)?;
                self.directory.upsert_guild(&guild);
                Ok(Action::Nothing)
            }
            "GUILD_UPDATE" => {
                let guild: DiscordGuild = serde_json::from_value(data)?;
                self.directory.update_guild(&guild);
                Ok(Action::Nothing)
            }
            "GUILD_DELETE" => {
                let deleted: GuildDelete = serde_json::from_value(data)?;
                // Outages also arrive as GUILD_DELETE; keep the entry then.
                if !deleted.unavailable {
                    self.directory.remove_guild(&deleted.id);
                }
                Ok(Action::Nothing)
            }
            "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
                let channel: DiscordChannel = serde_json::from_value(data)?;
                self.directory.upsert_channel(&channel);
                Ok(Action::Nothing)
            }
            "CHANNEL_DELETE" => {
                let channel: DiscordChannel = serde_json::from_value(data)?;
                self.directory.remove_channel(&channel.id);
                Ok(Action::Nothing)
            }
            "MESSAGE_CREATE" => {
                let raw: DiscordMessage = serde_json::from_value(data)?;
                let author_id = raw.author.id.clone();
                let author_is_bot = raw.author.bot;
                let context = self.directory.context_for(&raw.channel_id);
                let message = raw.into_message(context);

                debug!(
                    message_id = %message.id,
                    channel_id = %message.channel_id,
                    author = %message.author,
                    "received message"
                );

                Ok(Action::Emit(GatewayEvent::MessageCreate(InboundMessage {
                    message,
                    author_id,
                    author_is_bot,
                })))
            }
            other => {
                trace!(event = %other, "ignoring gateway dispatch");
                Ok(Action::Nothing)
            }
        }
    }
}

fn parse_hello(text: &str) -> Result<Hello, DiscordError> {
    let payload: GatewayPayload = serde_json::from_str(text)?;
    if payload.op != OP_HELLO {
        return Err(DiscordError::InvalidResponse(format!(
            "expected HELLO, got opcode {}",
            payload.op
        )));
    }
    Ok(serde_json::from_value(payload.d)?)
}

async fn send_heartbeat<S>(write: &mut S, session: &mut Session) -> Result<(), DiscordError>
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let payload = serde_json::json!({ "op": OP_HEARTBEAT, "d": session.seq });
    write
        .send(WsMessage::Text(payload.to_string()))
        .await
        .map_err(|e| DiscordError::WebSocket(format!("heartbeat failed: {}", e)))?;
    session.ack_pending = true;
    trace!(seq = ?session.seq, "heartbeat sent");
    Ok(())
}
