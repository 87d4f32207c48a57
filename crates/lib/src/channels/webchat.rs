//! Webchat channel: a polling JSON endpoint for browser chat widgets (single port).
//!
//! `POST <route>` takes a [`ChatRequest`] and answers with the replies queued for that uid.
//! `GET /` reports health.

use super::outbound::{escape_html, link_domain, outbound_buttons, split_message, OutboundButton};
use super::{Channel, Specifications};
use crate::bot::Bot;
use crate::config::{is_loopback_bind, WebchatConfig};
use crate::conversation::Button;
use crate::message::Message;
use anyhow::Context as _;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const MAX_MESSAGE_LENGTH: usize = 10_000;

/// Sessions not seen for this long are dropped along with their queued replies.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Upper bound on live sessions; the least recently seen one is evicted to make room.
pub const MAX_SESSIONS: usize = 10_000;

/// Body of `POST <route>`. With neither `text` nor `quickReply` it is a poll.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Start a new session; the server allocates the uid.
    #[serde(default)]
    pub init: bool,
    pub uid: Option<String>,
    /// Bound to the uid on first use; later requests must repeat it.
    pub secret: Option<String>,
    pub text: Option<String>,
    /// Payload of a clicked button.
    pub quick_reply: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub to: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Vec<OutboundButton>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub uid: String,
    pub replies: Vec<ChatReply>,
}

struct Session {
    secret: String,
    last_seen: Instant,
}

/// Queues replies per uid until the widget polls for them.
pub struct WebchatChannel {
    sessions: RwLock<HashMap<String, Session>>,
    outbox: RwLock<HashMap<String, Vec<ChatReply>>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl Default for WebchatChannel {
    fn default() -> Self {
        Self::with_limits(SESSION_IDLE_TIMEOUT, MAX_SESSIONS)
    }
}

impl WebchatChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            outbox: RwLock::new(HashMap::new()),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Allocate a uid bound to `secret`.
    pub async fn open_session(&self, secret: &str) -> String {
        let uid = uuid::Uuid::new_v4().simple().to_string();
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions).await;
        self.bind(&mut sessions, &uid, secret).await;
        log::debug!("webchat: session {} opened", uid);
        uid
    }

    /// True when `secret` matches the one bound to `uid`. An unseen or expired uid is bound to
    /// `secret`.
    pub async fn authorize(&self, uid: &str, secret: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions).await;
        match sessions.get_mut(uid) {
            Some(session) => {
                if session.secret != secret {
                    return false;
                }
                session.last_seen = Instant::now();
                true
            }
            None => {
                self.bind(&mut sessions, uid, secret).await;
                true
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn bind(&self, sessions: &mut HashMap<String, Session>, uid: &str, secret: &str) {
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_seen)
                .map(|(uid, _)| uid.clone());
            let Some(oldest) = oldest else { break };
            sessions.remove(&oldest);
            self.outbox.write().await.remove(&oldest);
            log::debug!("webchat: session {} evicted", oldest);
        }
        sessions.insert(
            uid.to_string(),
            Session {
                secret: secret.to_string(),
                last_seen: Instant::now(),
            },
        );
    }

    /// Drop idle sessions and any replies queued for uids without a session.
    async fn prune(&self, sessions: &mut HashMap<String, Session>) {
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen.elapsed() < self.idle_timeout);
        if sessions.len() < before {
            log::debug!("webchat: {} idle sessions expired", before - sessions.len());
        }
        self.outbox
            .write()
            .await
            .retain(|uid, _| sessions.contains_key(uid));
    }

    /// Take every reply queued for `uid`.
    pub async fn drain(&self, uid: &str) -> Vec<ChatReply> {
        self.outbox.write().await.remove(uid).unwrap_or_default()
    }

    async fn push(&self, message: &Message, text: &str, buttons: &[Button]) {
        let to = raw_uid(message);
        let chunks = split_message(text, MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);
        let mut outbox = self.outbox.write().await;
        let queue = outbox.entry(to.clone()).or_default();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let buttons = (i == last && !buttons.is_empty()).then(|| outbound_buttons(buttons));
            queue.push(ChatReply {
                to: to.clone(),
                text: chunk,
                buttons,
            });
        }
    }
}

fn raw_uid(message: &Message) -> String {
    message
        .extra("uid")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            message
                .user_id
                .strip_prefix("webchat:")
                .map(str::to_string)
        })
        .unwrap_or_else(|| message.user_id.clone())
}

#[async_trait]
impl Channel for WebchatChannel {
    fn id(&self) -> &str {
        "webchat"
    }

    fn specifications(&self) -> Specifications {
        Specifications {
            max_message_length: Some(MAX_MESSAGE_LENGTH),
            ..Specifications::default()
        }
    }

    async fn send_text(&self, message: &Message, text: &str, buttons: &[Button]) -> anyhow::Result<()> {
        self.push(message, text, buttons).await;
        Ok(())
    }

    async fn send_photo(&self, message: &Message, url: &str, buttons: &[Button]) -> anyhow::Result<()> {
        self.push(message, &format!("<img src=\"{}\">", escape_html(url)), buttons)
            .await;
        Ok(())
    }

    async fn send_link(
        &self,
        message: &Message,
        url: &str,
        buttons: &[Button],
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut text = format!(
            "<a href=\"{}\" target=\"_blank\">{}</a>",
            escape_html(url),
            escape_html(link_domain(url))
        );
        if let Some(c) = caption.filter(|c| !c.trim().is_empty()) {
            text.push('\n');
            text.push_str(c);
        }
        self.push(message, &text, buttons).await;
        Ok(())
    }
}

#[derive(Clone)]
struct WebchatState {
    bot: Bot,
    channel: Arc<WebchatChannel>,
    port: u16,
}

/// HTTP routes for the webchat channel. The channel is not registered with the bot here.
pub fn webchat_router(bot: Bot, channel: Arc<WebchatChannel>, route: &str, port: u16) -> axum::Router {
    let route = if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{}", route)
    };
    axum::Router::new()
        .route("/", get(health_http))
        .route(&route, post(chat_http))
        .with_state(WebchatState { bot, channel, port })
}

/// Register a webchat channel and serve it until SIGINT/SIGTERM.
pub async fn serve_webchat(bot: Bot, config: &WebchatConfig) -> anyhow::Result<()> {
    let bind = config.bind.trim();
    if !is_loopback_bind(bind) {
        log::warn!("webchat bound to non-loopback address {}", bind);
    }

    let channel = Arc::new(WebchatChannel::new());
    bot.register_channel(channel.clone()).await;
    let app = webchat_router(bot.clone(), channel, &config.route, config.port);

    let bind_addr = format!("{}:{}", bind, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("webchat listening on {} (route {})", bind_addr, config.route);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(bot))
        .await
        .context("webchat server exited")?;
    log::info!("webchat stopped");
    Ok(())
}

/// Completes on SIGINT or SIGTERM, then stops every channel.
async fn shutdown_signal(bot: Bot) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels");
    bot.shutdown().await;
}

/// GET / returns a simple health JSON.
async fn health_http(State(state): State<WebchatState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "channels": state.bot.channels().ids().await,
        "users": state.bot.users().len().await,
        "sessions": state.channel.session_count().await,
        "port": state.port,
    }))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// POST <route>: open a session, deliver a text or button click, and return queued replies.
async fn chat_http(State(state): State<WebchatState>, Json(req): Json<ChatRequest>) -> Response {
    let secret = req.secret.unwrap_or_default();
    let uid = if req.init {
        state.channel.open_session(&secret).await
    } else {
        let Some(uid) = req.uid.filter(|u| !u.trim().is_empty()) else {
            return error_response(StatusCode::BAD_REQUEST, "missing uid");
        };
        if !state.channel.authorize(&uid, &secret).await {
            log::warn!("webchat: secret mismatch for uid {}", uid);
            return error_response(StatusCode::FORBIDDEN, "secret mismatch");
        }
        uid
    };

    let channel: Arc<dyn Channel> = state.channel.clone();
    let message = match (req.quick_reply, req.text) {
        (Some(payload), _) => Some(Message::button_click(channel, &uid, payload)),
        (None, Some(text)) if !text.trim().is_empty() => Some(Message::text(channel, &uid, text)),
        _ => None,
    };
    if let Some(message) = message {
        let message = message.with_extra("uid", json!(uid));
        match state.bot.handle_event(message).await {
            Ok(outcome) if !outcome.handled() => log::debug!("webchat: {} unhandled", uid),
            Ok(_) => {}
            Err(e) => {
                log::warn!("webchat: dispatch for {} failed: {}", uid, e);
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
            }
        }
    }

    let replies = state.channel.drain(&uid).await;
    Json(ChatResponse { uid, replies }).into_response()
}
