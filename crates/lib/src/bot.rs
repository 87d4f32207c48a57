//! The bot: shared context handed to adapters, and the dispatch pipeline.
//!
//! A text-capable event goes through, in order: the user's pending responses, the remembered
//! on-other-response fallback, the global conditions, the channel catch-all, and the router
//! catch-all. The first stage that yields a handler runs it and ends the dispatch. Button clicks
//! resolve the clicked button first and fall into the text pipeline when it carries literal text.
//!
//! Dispatches for one user run one at a time (the user's turn lock is held for the whole event,
//! handler included). A handler must not dispatch another event for its own user.

use crate::channels::{Channel, ChannelRegistry};
use crate::config::{self, BotConfig, Config};
use crate::conversation::{Action, Button, Fallback};
use crate::error::{Error, Result};
use crate::handler::{Context, Handler, Matched};
use crate::message::{EventKind, Message, Passthrough, Transcoder};
use crate::router::{Outcome, Router, Stage};
use crate::store::{JsonFileStore, UserStore};
use crate::users::{User, UserRegistry};
use anyhow::Context as _;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Shared bot state. Cheap to clone; every adapter holds one.
#[derive(Clone)]
pub struct Bot {
    router: Arc<Router>,
    users: Arc<UserRegistry>,
    channels: Arc<ChannelRegistry>,
    store: Option<Arc<dyn UserStore>>,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<BotConfig>,
}

impl Bot {
    /// Bot with default settings, in-memory user data and no transcoding.
    pub fn new(router: Router) -> Self {
        log::debug!("commands: {}", router.command_names().join(", "));
        Self {
            router: Arc::new(router),
            users: Arc::new(UserRegistry::new()),
            channels: Arc::new(ChannelRegistry::new()),
            store: None,
            transcoder: Arc::new(Passthrough),
            config: Arc::new(BotConfig::default()),
        }
    }

    /// Build from loaded config; opens the JSON user file when one is configured.
    pub async fn from_config(router: Router, config: &Config) -> anyhow::Result<Self> {
        let mut bot = Self::new(router).with_config(config.bot.clone());
        if let Some(path) = config::resolve_user_file(config) {
            let store = JsonFileStore::load(&path)
                .await
                .with_context(|| format!("loading user file {}", path.display()))?;
            log::info!("user data stored in {}", path.display());
            bot = bot.with_store(Arc::new(store));
        }
        Ok(bot)
    }

    pub fn with_config(mut self, config: BotConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn title(&self) -> &str {
        &self.config.title
    }

    pub async fn register_channel(&self, channel: Arc<dyn Channel>) {
        self.channels.register(channel).await;
    }

    /// Stop every registered channel.
    pub async fn shutdown(&self) {
        self.channels.stop_all().await;
    }

    // --- entry points ---

    /// Dispatch any event by its kind. Unknown kinds are logged and rejected.
    pub async fn handle_event(&self, message: Message) -> Result<Outcome> {
        match &message.kind {
            EventKind::Text => self.handle_text(message).await,
            EventKind::ButtonClick => self.handle_button_click(message).await,
            EventKind::Location(_) => self.handle_location(message).await,
            EventKind::Other(kind) => {
                log::warn!(
                    "{}: unknown event type {:?} from channel {}",
                    message.user_id,
                    kind,
                    message.channel_id()
                );
                Err(Error::UnknownEventType(kind.clone()))
            }
        }
    }

    pub async fn handle_text(&self, message: Message) -> Result<Outcome> {
        let user = self.users.get_or_create(&message.user_id).await;
        let _turn = user.begin_turn().await;
        user.set_last_message(message.clone()).await;
        self.dispatch_text(&user, message).await
    }

    /// The message text is the clicked button's payload.
    pub async fn handle_button_click(&self, mut message: Message) -> Result<Outcome> {
        let user = self.users.get_or_create(&message.user_id).await;
        let _turn = user.begin_turn().await;
        user.set_last_message(message.clone()).await;

        let payload = message.text.clone().ok_or_else(|| {
            Error::Normalization(format!("button click from {} has no payload", message.user_id))
        })?;
        let button = user.state().await.get_button(&payload, true);
        match button {
            None => {
                log::debug!("{}: no pending button for {:?}", user.id(), payload);
                self.dispatch_text(&user, message).await
            }
            Some(Button {
                action: Action::Literal(text),
                ..
            }) => {
                message.substitute_text(text, self.transcoder.as_ref())?;
                self.dispatch_text(&user, message).await
            }
            Some(Button {
                label,
                action: Action::Handler(handler),
                ..
            }) => {
                message.normalize_with(self.transcoder.as_ref())?;
                let matched = Matched::Response {
                    definitive: label,
                    text: payload,
                };
                self.invoke(&user, &handler, message, matched).await?;
                Ok(self.handled(&user, Stage::Button))
            }
        }
    }

    pub async fn handle_location(&self, message: Message) -> Result<Outcome> {
        let user = self.users.get_or_create(&message.user_id).await;
        let _turn = user.begin_turn().await;
        user.set_last_message(message.clone()).await;

        match message.channel.location_handler() {
            Some(handler) => {
                self.invoke(&user, &handler, message, Matched::Empty).await?;
                Ok(self.handled(&user, Stage::Location))
            }
            None => {
                log::info!("{}: location ignored, channel has no handler", user.id());
                Ok(Outcome::Unhandled)
            }
        }
    }

    async fn dispatch_text(&self, user: &Arc<User>, mut message: Message) -> Result<Outcome> {
        let transcoder = self.transcoder.as_ref();
        message.normalize_with(transcoder)?;

        // A literal action re-dispatches its text; the table is cleared by then, so this loops at
        // most once. The exit command is checked against every text, substituted ones included.
        loop {
            let hit = {
                let mut state = user.state().await;
                if state.exit_command() == Some(message.text_lower()) {
                    state.end_conversation();
                    log::info!("{}: conversation ended by {:?}", user.id(), message.text_nice());
                }
                state.get_response(message.text_lower(), true)
            };
            let Some(hit) = hit else { break };
            match hit.action {
                Action::Literal(text) => message.substitute_text(text, transcoder)?,
                Action::Handler(handler) => {
                    let matched = Matched::Response {
                        definitive: hit.definitive,
                        text: hit.matched,
                    };
                    self.invoke(user, &handler, message, matched).await?;
                    return Ok(self.handled(user, Stage::PendingResponse));
                }
            }
        }

        let fallback = user.state().await.get_on_other_response();
        if let Some(Fallback { handler, value }) = fallback {
            self.invoke(user, &handler, message, Matched::Stage(value)).await?;
            return Ok(self.handled(user, Stage::Fallback));
        }

        if let Some((name, handler)) = self.router.resolve(&message) {
            let stage = Stage::Condition(name.to_string());
            let handler = handler.clone();
            self.invoke(user, &handler, message, Matched::Empty).await?;
            return Ok(self.handled(user, stage));
        }

        if let Some(handler) = message.channel.catch_all() {
            self.invoke(user, &handler, message, Matched::Empty).await?;
            return Ok(self.handled(user, Stage::ChannelCatchAll));
        }

        if let Some(handler) = self.router.catch_all().cloned() {
            self.invoke(user, &handler, message, Matched::Empty).await?;
            return Ok(self.handled(user, Stage::CatchAll));
        }

        log::info!("{}: no handler for {:?}", user.id(), message.text_nice());
        Ok(Outcome::Unhandled)
    }

    async fn invoke(
        &self,
        user: &Arc<User>,
        handler: &Handler,
        message: Message,
        matched: Matched,
    ) -> Result<()> {
        let cx = Context::new(self.clone(), user.clone(), message);
        handler.invoke(cx, matched).await.map_err(Error::Handler)
    }

    fn handled(&self, user: &User, stage: Stage) -> Outcome {
        log::debug!("{}: handled by {:?}", user.id(), stage);
        Outcome::Handled(stage)
    }

    // --- sending ---

    pub async fn send_text(&self, message: &Message, text: &str) -> anyhow::Result<()> {
        self.send_text_with_buttons(message, text, &[]).await
    }

    /// Send text with buttons without remembering them as pending responses.
    pub async fn send_text_with_buttons(
        &self,
        message: &Message,
        text: &str,
        buttons: &[Button],
    ) -> anyhow::Result<()> {
        let text = self.transcoder.emojize(text);
        message.channel.send_text(message, &text, buttons).await
    }

    pub async fn send_photo(&self, message: &Message, url: &str, buttons: &[Button]) -> anyhow::Result<()> {
        message.channel.send_photo(message, url, buttons).await
    }

    pub async fn send_link(
        &self,
        message: &Message,
        url: &str,
        buttons: &[Button],
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        let caption = caption.map(|c| self.transcoder.emojize(c));
        message
            .channel
            .send_link(message, url, buttons, caption.as_deref())
            .await
    }

    /// Remember `responses` (and the optional fallback) for the message's user, then send `text`
    /// with those buttons.
    pub async fn send_question(
        &self,
        message: &Message,
        text: &str,
        responses: Vec<Button>,
        fallback: Option<Fallback>,
    ) -> anyhow::Result<()> {
        let user = self.users.get_or_create(&message.user_id).await;
        self.send_question_for(&user, message, text, responses, fallback)
            .await
    }

    /// Like [`Self::send_question`] for a user already in hand, such as the one being dispatched.
    pub async fn send_question_for(
        &self,
        user: &User,
        message: &Message,
        text: &str,
        responses: Vec<Button>,
        fallback: Option<Fallback>,
    ) -> anyhow::Result<()> {
        user.state()
            .await
            .remember_responses(responses.iter().cloned(), fallback);
        self.send_text_with_buttons(message, text, &responses).await
    }

    /// Send to a user outside a dispatch, through the channel of their last message.
    pub async fn send_text_to(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        let last = match self.users.get(user_id).await {
            Some(user) => user.last_message().await,
            None => None,
        };
        let Some(last) = last else {
            return Err(Error::UnknownUser(user_id.to_string()).into());
        };
        self.send_text(&last, text).await
    }

    // --- conversation scope ---

    pub async fn start_conversation(&self, message: &Message) {
        let user = self.users.get_or_create(&message.user_id).await;
        self.start_conversation_for(&user).await;
    }

    pub async fn end_conversation(&self, message: &Message) {
        let user = self.users.get_or_create(&message.user_id).await;
        self.end_conversation_for(&user).await;
    }

    /// Open a conversation scope; the configured cancel command ends it.
    pub async fn start_conversation_for(&self, user: &User) {
        user.state()
            .await
            .start_conversation_with_exit(self.config.cancel_command.clone());
        log::info!("{}: conversation started", user.id());
    }

    pub async fn end_conversation_for(&self, user: &User) {
        user.state().await.end_conversation();
        log::info!("{}: conversation ended", user.id());
    }

    // --- long-lived user data ---

    pub async fn store_value(&self, message: &Message, key: &str, value: Value) -> Result<()> {
        let user = self.users.get_or_create(&message.user_id).await;
        self.store_value_for(&user, message, key, value).await
    }

    pub async fn retrieve_value(&self, message: &Message, key: &str) -> Result<Option<Value>> {
        Ok(self.retrieve_values(message).await?.remove(key))
    }

    pub async fn retrieve_values(&self, message: &Message) -> Result<Map<String, Value>> {
        let user = self.users.get_or_create(&message.user_id).await;
        self.retrieve_values_for(&user, message).await
    }

    pub async fn clear_values(&self, message: &Message) -> Result<()> {
        let user = self.users.get_or_create(&message.user_id).await;
        self.clear_values_for(&user, message).await
    }

    /// Without a store the values live on `user` itself.
    pub(crate) async fn store_value_for(
        &self,
        user: &User,
        message: &Message,
        key: &str,
        value: Value,
    ) -> Result<()> {
        match &self.store {
            Some(store) => store
                .store(message.channel_id(), user.id(), key, value)
                .await
                .map_err(|e| persistence_failed(user.id(), e)),
            None => {
                user.set_data(key, value).await;
                Ok(())
            }
        }
    }

    pub(crate) async fn retrieve_values_for(
        &self,
        user: &User,
        message: &Message,
    ) -> Result<Map<String, Value>> {
        match &self.store {
            Some(store) => store
                .retrieve(message.channel_id(), user.id())
                .await
                .map_err(|e| persistence_failed(user.id(), e)),
            None => Ok(user.data().await),
        }
    }

    pub(crate) async fn clear_values_for(&self, user: &User, message: &Message) -> Result<()> {
        match &self.store {
            Some(store) => store
                .clear(message.channel_id(), user.id())
                .await
                .map_err(|e| persistence_failed(user.id(), e)),
            None => {
                user.clear_data().await;
                Ok(())
            }
        }
    }
}

fn persistence_failed(user_id: &str, e: crate::store::StoreError) -> Error {
    log::warn!("{}: user data store failed: {}", user_id, e);
    Error::Persistence(e)
}
