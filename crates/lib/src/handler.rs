//! Handlers and the context they run in.
//!
//! A handler takes either the message alone or the message plus the value that matched. The form is
//! fixed when the [`Handler`] is built, never inferred at call time.

use crate::bot::Bot;
use crate::conversation::{Button, Fallback};
use crate::message::Message;
use crate::users::User;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// What a value-taking handler receives alongside the message.
#[derive(Debug, Clone, PartialEq)]
pub enum Matched {
    /// A pending response matched. `definitive` is the vague container's definitive value (or the
    /// button label for a label match); `text` is what the user actually typed that matched.
    Response { definitive: String, text: String },
    /// The on-other-response fallback ran; this is the value remembered with it.
    Stage(Value),
    /// Matched by a condition or catch-all; nothing to hand over.
    Empty,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, cx: Context) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ValueHandler: Send + Sync {
    async fn handle(&self, cx: Context, matched: Matched) -> anyhow::Result<()>;
}

/// A registered handler in one of its two forms.
#[derive(Clone)]
pub enum Handler {
    Message(Arc<dyn MessageHandler>),
    WithValue(Arc<dyn ValueHandler>),
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, cx: Context) -> anyhow::Result<()> {
        (self.0)(cx).await
    }
}

struct FnValueHandler<F>(F);

#[async_trait]
impl<F, Fut> ValueHandler for FnValueHandler<F>
where
    F: Fn(Context, Matched) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, cx: Context, matched: Matched) -> anyhow::Result<()> {
        (self.0)(cx, matched).await
    }
}

impl Handler {
    /// Handler that only takes the message.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Message(Arc::new(FnHandler(f)))
    }

    /// Handler that also takes the matched value.
    pub fn with_value<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Matched) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::WithValue(Arc::new(FnValueHandler(f)))
    }

    pub fn takes_value(&self) -> bool {
        matches!(self, Self::WithValue(_))
    }

    pub(crate) async fn invoke(&self, cx: Context, matched: Matched) -> anyhow::Result<()> {
        match self {
            Self::Message(h) => h.handle(cx).await,
            Self::WithValue(h) => h.handle(cx, matched).await,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(_) => f.write_str("Handler::Message"),
            Self::WithValue(_) => f.write_str("Handler::WithValue"),
        }
    }
}

/// Everything a handler needs: the message, its user, and the bot to reply through.
#[derive(Clone)]
pub struct Context {
    bot: Bot,
    user: Arc<User>,
    message: Message,
}

impl Context {
    pub(crate) fn new(bot: Bot, user: Arc<User>, message: Message) -> Self {
        Self { bot, user, message }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    pub fn user_id(&self) -> &str {
        &self.message.user_id
    }

    /// Trimmed, transcoded text of the message being handled.
    pub fn text(&self) -> &str {
        self.message.text_nice()
    }

    pub async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.bot.send_text(&self.message, text).await
    }

    pub async fn send_text_with_buttons(&self, text: &str, buttons: &[Button]) -> anyhow::Result<()> {
        self.bot.send_text_with_buttons(&self.message, text, buttons).await
    }

    pub async fn send_photo(&self, url: &str, buttons: &[Button]) -> anyhow::Result<()> {
        self.bot.send_photo(&self.message, url, buttons).await
    }

    pub async fn send_link(
        &self,
        url: &str,
        buttons: &[Button],
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        self.bot.send_link(&self.message, url, buttons, caption).await
    }

    /// Remember `responses` (and the optional fallback) for this user, then ask.
    pub async fn send_question(
        &self,
        text: &str,
        responses: Vec<Button>,
        fallback: Option<Fallback>,
    ) -> anyhow::Result<()> {
        self.bot
            .send_question_for(&self.user, &self.message, text, responses, fallback)
            .await
    }

    pub async fn start_conversation(&self) {
        self.bot.start_conversation_for(&self.user).await;
    }

    pub async fn end_conversation(&self) {
        self.bot.end_conversation_for(&self.user).await;
    }

    pub async fn store_value(&self, key: &str, value: Value) -> crate::Result<()> {
        self.bot
            .store_value_for(&self.user, &self.message, key, value)
            .await
    }

    pub async fn retrieve_value(&self, key: &str) -> crate::Result<Option<Value>> {
        Ok(self.retrieve_values().await?.remove(key))
    }

    pub async fn retrieve_values(&self) -> crate::Result<Map<String, Value>> {
        self.bot.retrieve_values_for(&self.user, &self.message).await
    }

    pub async fn clear_values(&self) -> crate::Result<()> {
        self.bot.clear_values_for(&self.user, &self.message).await
    }
}
