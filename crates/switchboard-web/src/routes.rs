//! Web routes.

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path as UrlPath, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::{Html, IntoResponse, Json},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use switchboard_discord::{ChannelSummary, GuildSummary, Message};
use switchboard_relay::Relay;

use crate::ApiError;
use crate::sse::snapshot_stream;

/// Shared state for the web server.
pub struct AppState {
    pub relay: Relay,
}

/// Create the web router.
///
/// If `static_dir` is given it is served under `/static`.
pub fn create_router(relay: Relay, static_dir: Option<&Path>) -> Router {
    let state = Arc::new(AppState { relay });

    let mut router = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        // History
        .route("/messages", get(history_messages))
        .route("/stream", get(stream))
        // Directory
        .route("/guilds", get(guilds))
        .route("/channels/{guild_id}", get(channels))
        // Channel cache
        .route("/messages/{channel_id}", get(channel_messages))
        .route("/send-message", post(send_message))
        .with_state(state);

    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    router
}

/// Query string pairs in request order. Repeated keys are kept.
type QueryPairs = Vec<(String, String)>;

/// The first `after` value. An empty `after=` counts as no cursor.
fn cursor(pairs: &[(String, String)]) -> Option<&str> {
    pairs
        .iter()
        .find(|(key, _)| key == "after")
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "history_len": state.relay.history().len().await,
        "active_streams": state.relay.hub().active_count(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn history_messages(
    State(state): State<Arc<AppState>>,
    query: Result<Query<QueryPairs>, QueryRejection>,
) -> Json<Vec<Message>> {
    match query {
        Ok(Query(pairs)) => Json(state.relay.history().query(cursor(&pairs)).await),
        Err(e) => {
            warn!(error = %e, "unreadable history query");
            Json(Vec::new())
        }
    }
}

async fn stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let feed = state
        .relay
        .hub()
        .spawn_feed(Arc::clone(state.relay.history()));
    snapshot_stream(feed)
}

async fn guilds(State(state): State<Arc<AppState>>) -> Result<Json<Vec<GuildSummary>>, ApiError> {
    let guilds = state.relay.gateway().list_guilds().await?;
    debug!(count = guilds.len(), "listed guilds");
    Ok(Json(guilds))
}

async fn channels(
    State(state): State<Arc<AppState>>,
    UrlPath(guild_id): UrlPath<String>,
) -> Result<Json<Vec<ChannelSummary>>, ApiError> {
    match state.relay.gateway().list_channels(&guild_id).await {
        Ok(channels) => {
            debug!(guild_id = %guild_id, count = channels.len(), "listed channels");
            Ok(Json(channels))
        }
        Err(e) if e.is_not_found() => {
            warn!(guild_id = %guild_id, "unknown guild");
            Err(ApiError::NotFound(format!("guild not found: {}", guild_id)))
        }
        Err(e) => Err(e.into()),
    }
}

async fn channel_messages(
    State(state): State<Arc<AppState>>,
    UrlPath(channel_id): UrlPath<String>,
    query: Result<Query<QueryPairs>, QueryRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Query(pairs) = query.map_err(|e| {
        warn!(channel_id = %channel_id, error = %e, "rejected channel query");
        ApiError::BadRequest(format!("invalid query string: {}", e.body_text()))
    })?;
    require_channel(&state, &channel_id).await?;

    let messages = state
        .relay
        .channels()
        .get_messages(&channel_id, cursor(&pairs))
        .await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = body.map_err(|e| {
        warn!(error = %e, "rejected send-message body");
        ApiError::BadRequest(format!("invalid request body: {}", e.body_text()))
    })?;

    let channel_id = non_empty(request.channel_id)
        .ok_or_else(|| ApiError::BadRequest("missing required field: channel_id".to_string()))?;
    let content = non_empty(request.content)
        .ok_or_else(|| ApiError::BadRequest("missing required field: content".to_string()))?;

    let channel = require_channel(&state, &channel_id).await?;
    if let Some(guild_id) = non_empty(request.guild_id) {
        if channel.guild_id.as_deref() != Some(guild_id.as_str()) {
            warn!(channel_id = %channel_id, guild_id = %guild_id, "channel not in guild");
            return Err(ApiError::NotFound(format!(
                "channel {} not found in guild {}",
                channel_id, guild_id
            )));
        }
    }

    let gateway = Arc::clone(state.relay.gateway());
    tokio::spawn(async move {
        match gateway.send(&channel_id, &content).await {
            Ok(()) => info!(channel_id = %channel_id, "message sent"),
            Err(e) => error!(channel_id = %channel_id, error = %e, "failed to send message"),
        }
    });

    Ok(Json(json!({ "status": "success" })))
}

async fn require_channel(state: &AppState, channel_id: &str) -> Result<ChannelSummary, ApiError> {
    match state.relay.gateway().find_channel(channel_id).await? {
        Some(channel) => Ok(channel),
        None => {
            warn!(channel_id = %channel_id, "unknown channel");
            Err(ApiError::NotFound(format!("channel not found: {}", channel_id)))
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Switchboard</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            margin: 0;
            background: #0a0a0a;
            color: #e0e0e0;
        }
        header { padding: 1rem 2rem; border-bottom: 1px solid #222; display: flex; gap: 1rem; align-items: center; }
        header h1 { color: #88c0d0; font-size: 1.3rem; margin: 0 1rem 0 0; }
        select, input, button {
            background: #151515; color: #e0e0e0; border: 1px solid #333;
            border-radius: 4px; padding: 0.4rem 0.6rem; font-size: 0.95rem;
        }
        button { cursor: pointer; }
        button:hover { border-color: #81a1c1; }
        main { display: grid; grid-template-columns: 2fr 1fr; gap: 1rem; padding: 1rem 2rem; }
        section { background: #111; border: 1px solid #222; border-radius: 6px; padding: 1rem; }
        section h2 { margin: 0 0 0.75rem; font-size: 1rem; color: #81a1c1; }
        .messages { height: 65vh; overflow-y: auto; }
        .message { padding: 0.5rem 0; border-bottom: 1px solid #1c1c1c; }
        .message-header { font-size: 0.85rem; color: #888; display: flex; gap: 0.75rem; }
        .author { color: #a3be8c; font-weight: 600; }
        .where { color: #b48ead; }
        .message-content { white-space: pre-wrap; margin-top: 0.25rem; }
        .attachment img { max-width: 100%; max-height: 300px; border-radius: 5px; margin-top: 0.4rem; }
        .attachment a { color: #81a1c1; }
        .empty { color: #666; font-style: italic; }
        .compose { display: flex; gap: 0.5rem; margin-top: 0.75rem; }
        .compose input { flex: 1; }
        .status { font-size: 0.8rem; color: #666; margin-left: auto; }
        .error { color: #bf616a; }
        .lang button.active { border-color: #88c0d0; color: #88c0d0; }
    </style>
</head>
<body>
    <header>
        <h1 data-i18n="title">Switchboard</h1>
        <select id="guild"></select>
        <select id="channel"><option value="" data-i18n="select-channel">Select channel</option></select>
        <button type="button" id="refresh" data-i18n="refresh">Refresh</button>
        <span class="status" id="status" data-i18n="connecting">connecting...</span>
        <span class="lang">
            <button type="button" id="lang-en" data-i18n="english">English</button>
            <button type="button" id="lang-zh" data-i18n="chinese">Traditional Chinese</button>
        </span>
    </header>
    <main>
        <section>
            <h2 id="channel-title" data-i18n="channel">Channel</h2>
            <div class="messages" id="channel-messages"><div class="empty" data-i18n="no-channel">No channel selected</div></div>
            <form class="compose" id="compose">
                <input id="content" data-i18n-placeholder="message" placeholder="Message" autocomplete="off">
                <button type="submit" data-i18n="send">Send</button>
            </form>
        </section>
        <section>
            <h2 data-i18n="live">Live</h2>
            <div class="messages" id="live-messages"><div class="empty" data-i18n="no-messages">No messages yet</div></div>
        </section>
    </main>
    <script>
        const state = { guild: null, channel: null, cursor: null, seen: new Set() };

        const translations = {
            'en': {
                'title': 'Switchboard',
                'select-server': 'Select server',
                'no-servers': 'No servers available',
                'error-server': 'Failed to load servers',
                'select-channel': 'Select channel',
                'no-channel': 'No channel selected',
                'channel': 'Channel',
                'live': 'Live',
                'no-messages': 'No messages yet',
                'message': 'Message',
                'send': 'Send',
                'refresh': 'Refresh',
                'loading': 'Loading...',
                'connecting': 'connecting...',
                'connected': 'live',
                'reconnecting': 'reconnecting...',
                'english': 'English',
                'chinese': 'Traditional Chinese',
            },
            'zh-TW': {
                'title': 'Discord 機器人控制面板',
                'select-server': '選擇伺服器',
                'no-servers': '沒有可用的伺服器',
                'error-server': '伺服器錯誤',
                'select-channel': '選擇頻道',
                'no-channel': '請先選擇頻道',
                'channel': '頻道',
                'live': '即時訊息',
                'no-messages': '沒有可用的訊息',
                'message': '訊息',
                'send': '傳送',
                'refresh': '重新整理',
                'loading': '載入中...',
                'connecting': '連線中...',
                'connected': '已連線',
                'reconnecting': '連線錯誤，重新連線中...',
                'english': '英文',
                'chinese': '繁體中文',
            },
        };

        let language = translations[localStorage.getItem('language')] ? localStorage.getItem('language') : 'en';

        function t(key) {
            return (translations[language] && translations[language][key]) || translations['en'][key] || key;
        }

        function applyLanguage() {
            document.documentElement.lang = language;
            for (const el of document.querySelectorAll('[data-i18n]')) {
                el.textContent = t(el.dataset.i18n);
            }
            for (const el of document.querySelectorAll('[data-i18n-placeholder]')) {
                el.placeholder = t(el.dataset.i18nPlaceholder);
            }
            document.getElementById('lang-en').classList.toggle('active', language === 'en');
            document.getElementById('lang-zh').classList.toggle('active', language === 'zh-TW');
        }

        function setLanguage(lang) {
            language = translations[lang] ? lang : 'en';
            localStorage.setItem('language', language);
            applyLanguage();
        }

        function escapeHtml(text) {
            const div = document.createElement('div');
            div.textContent = text == null ? '' : String(text);
            return div.innerHTML;
        }

        function renderMessage(msg, showWhere) {
            let html = '<div class="message"><div class="message-header">';
            html += `<span class="author">${escapeHtml(msg.author)}</span>`;
            if (showWhere) {
                const where = msg.guild_name ? `${msg.guild_name} #${msg.channel_name}` : msg.channel_name;
                html += `<span class="where">${escapeHtml(where)}</span>`;
            }
            html += `<span>${escapeHtml(new Date(msg.timestamp).toLocaleString())}</span></div>`;
            html += `<div class="message-content">${escapeHtml(msg.content)}</div>`;
            for (const att of msg.attachments || []) {
                if (att.content_type && att.content_type.startsWith('image/')) {
                    html += `<div class="attachment"><img src="${escapeHtml(att.url)}" alt="${escapeHtml(att.filename)}"></div>`;
                } else {
                    html += `<div class="attachment"><a href="${escapeHtml(att.url)}" target="_blank">${escapeHtml(att.filename)}</a></div>`;
                }
            }
            return html + '</div>';
        }

        function setStatus(text, isError, key) {
            const el = document.getElementById('status');
            el.textContent = text;
            el.className = isError ? 'status error' : 'status';
            if (key) {
                el.dataset.i18n = key;
            } else {
                delete el.dataset.i18n;
            }
        }

        async function loadGuilds() {
            const select = document.getElementById('guild');
            select.innerHTML = `<option value="">${escapeHtml(t('loading'))}</option>`;
            const res = await fetch('/guilds');
            if (!res.ok) {
                select.innerHTML = `<option value="">${escapeHtml(t('error-server'))}</option>`;
                return;
            }
            const guilds = await res.json();
            if (guilds.length === 0) {
                select.innerHTML = `<option value="">${escapeHtml(t('no-servers'))}</option>`;
                return;
            }
            select.innerHTML = guilds.map(g => `<option value="${escapeHtml(g.id)}">${escapeHtml(g.name)}</option>`).join('');
            const keep = guilds.some(g => g.id === state.guild) ? state.guild : guilds[0].id;
            select.value = keep;
            await selectGuild(keep);
        }

        async function refresh() {
            const channel = state.channel;
            await loadGuilds();
            const select = document.getElementById('channel');
            const option = Array.from(select.options).find(o => o.value === channel);
            if (channel && option) {
                select.value = channel;
                await selectChannel(channel, option.text);
            } else {
                await selectChannel('', '');
            }
        }

        async function selectGuild(id) {
            state.guild = id;
            const res = await fetch(`/channels/${encodeURIComponent(id)}`);
            const select = document.getElementById('channel');
            select.innerHTML = '<option value="" data-i18n="select-channel"></option>';
            select.options[0].textContent = t('select-channel');
            if (!res.ok) return;
            const channels = await res.json();
            select.innerHTML += channels.map(c => `<option value="${escapeHtml(c.id)}">#${escapeHtml(c.name)}</option>`).join('');
        }

        async function selectChannel(id, name) {
            state.channel = id;
            state.cursor = null;
            state.seen = new Set();
            const title = document.getElementById('channel-title');
            if (id) {
                delete title.dataset.i18n;
                title.textContent = name;
            } else {
                title.dataset.i18n = 'channel';
                title.textContent = t('channel');
            }
            document.getElementById('channel-messages').innerHTML = id
                ? ''
                : `<div class="empty" data-i18n="no-channel">${escapeHtml(t('no-channel'))}</div>`;
            if (id) await pollChannel();
        }

        async function pollChannel() {
            if (!state.channel) return;
            const channel = state.channel;
            let url = `/messages/${encodeURIComponent(channel)}`;
            if (state.cursor) url += `?after=${encodeURIComponent(state.cursor)}`;
            const res = await fetch(url);
            if (channel !== state.channel) return;
            if (!res.ok) {
                const body = await res.json().catch(() => ({}));
                setStatus(body.error || `HTTP ${res.status}`, true);
                return;
            }
            const messages = await res.json();
            const container = document.getElementById('channel-messages');
            for (const msg of messages) {
                if (state.seen.has(msg.id)) continue;
                state.seen.add(msg.id);
                container.insertAdjacentHTML('beforeend', renderMessage(msg, false));
                state.cursor = msg.timestamp;
            }
            if (messages.length > 0) container.scrollTop = container.scrollHeight;
        }

        function connectStream() {
            const source = new EventSource('/stream');
            source.onopen = () => setStatus(t('connected'), false, 'connected');
            source.onerror = () => setStatus(t('reconnecting'), true, 'reconnecting');
            source.onmessage = (event) => {
                const { messages } = JSON.parse(event.data);
                const container = document.getElementById('live-messages');
                const atBottom = container.scrollHeight - container.scrollTop - container.clientHeight < 20;
                container.innerHTML = messages.length
                    ? messages.map(m => renderMessage(m, true)).join('')
                    : `<div class="empty" data-i18n="no-messages">${escapeHtml(t('no-messages'))}</div>`;
                if (atBottom) container.scrollTop = container.scrollHeight;
            };
        }

        document.getElementById('lang-en').addEventListener('click', () => setLanguage('en'));
        document.getElementById('lang-zh').addEventListener('click', () => setLanguage('zh-TW'));
        document.getElementById('refresh').addEventListener('click', () => {
            refresh().catch(err => setStatus(`${t('error-server')}: ${err}`, true));
        });
        document.getElementById('guild').addEventListener('change', e => selectGuild(e.target.value));
        document.getElementById('channel').addEventListener('change', e => {
            const opt = e.target.options[e.target.selectedIndex];
            selectChannel(e.target.value, opt ? opt.text : '');
        });
        document.getElementById('compose').addEventListener('submit', async (e) => {
            e.preventDefault();
            const input = document.getElementById('content');
            if (!state.channel || !input.value) return;
            const res = await fetch('/send-message', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ guild_id: state.guild, channel_id: state.channel, content: input.value }),
            });
            if (res.ok) {
                input.value = '';
                setTimeout(pollChannel, 1000);
            } else {
                const body = await res.json().catch(() => ({}));
                setStatus(body.error || `HTTP ${res.status}`, true);
            }
        });

        applyLanguage();
        loadGuilds().catch(err => setStatus(`${t('error-server')}: ${err}`, true));
        connectStream();
        setInterval(pollChannel, 3000);
    </script>
</body>
</html>
"#;
