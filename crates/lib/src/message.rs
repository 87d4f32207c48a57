//! Normalized inbound message: what every channel adapter hands to the dispatcher.

use crate::channels::Channel;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Channel-qualified user identifier, e.g. `webchat:4f2a…`.
pub type UserId = String;

/// Build the globally unique user id for a channel-local id.
pub fn qualify_user_id(channel_id: &str, raw: &str) -> UserId {
    format!("{}:{}", channel_id, raw)
}

/// Converts platform emoji/flag markers to and from a lookup-neutral text form.
///
/// The tables live outside the core; the dispatcher only calls through this seam.
pub trait Transcoder: Send + Sync {
    /// Inbound: platform text to neutral text.
    fn demojize(&self, text: &str) -> String;
    /// Outbound: neutral text to platform text.
    fn emojize(&self, text: &str) -> String;
}

/// Leaves text untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Transcoder for Passthrough {
    fn demojize(&self, text: &str) -> String {
        text.to_string()
    }

    fn emojize(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Trim, transcode, lower-case. Pure.
pub fn normalize(raw: &str, transcoder: &dyn Transcoder) -> (String, String) {
    let nice = transcoder.demojize(raw.trim());
    let lower = nice.to_lowercase();
    (nice, lower)
}

/// Geographic position shared by the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// What kind of event the adapter received.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Text,
    /// A button was pressed; the message text is the button's payload.
    ButtonClick,
    Location(Location),
    /// Anything else the platform delivered (e.g. "sticker"). Dispatch rejects it.
    Other(String),
}

/// One inbound event in normalized form. Lives for a single dispatch.
#[derive(Clone)]
pub struct Message {
    pub kind: EventKind,
    /// Raw text as received, if the event carries any.
    pub text: Option<String>,
    pub user_id: UserId,
    /// The adapter that produced this message; replies go back through it.
    pub channel: Arc<dyn Channel>,
    /// Adapter-specific handles (platform message/chat ids). Opaque to the core.
    pub extra: Map<String, Value>,
    text_nice: String,
    text_lower: String,
}

impl Message {
    /// General constructor. `raw_user_id` is channel-local; it gets prefixed with the channel id.
    pub fn new(
        channel: Arc<dyn Channel>,
        raw_user_id: &str,
        kind: EventKind,
        text: Option<String>,
    ) -> Self {
        let user_id = qualify_user_id(channel.id(), raw_user_id);
        let (text_nice, text_lower) = text
            .as_deref()
            .map(|t| normalize(t, &Passthrough))
            .unwrap_or_default();
        Self {
            kind,
            text,
            user_id,
            channel,
            extra: Map::new(),
            text_nice,
            text_lower,
        }
    }

    pub fn text(channel: Arc<dyn Channel>, raw_user_id: &str, text: impl Into<String>) -> Self {
        Self::new(channel, raw_user_id, EventKind::Text, Some(text.into()))
    }

    pub fn button_click(
        channel: Arc<dyn Channel>,
        raw_user_id: &str,
        payload: impl Into<String>,
    ) -> Self {
        Self::new(channel, raw_user_id, EventKind::ButtonClick, Some(payload.into()))
    }

    pub fn location(channel: Arc<dyn Channel>, raw_user_id: &str, location: Location) -> Self {
        Self::new(channel, raw_user_id, EventKind::Location(location), None)
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Trimmed, transcoded text.
    pub fn text_nice(&self) -> &str {
        &self.text_nice
    }

    /// Trimmed, transcoded, lower-cased text. What conditions and pending responses compare against.
    pub fn text_lower(&self) -> &str {
        &self.text_lower
    }

    pub fn channel_id(&self) -> &str {
        self.channel.id()
    }

    /// Recompute the normalized forms from the raw text.
    pub(crate) fn normalize_with(&mut self, transcoder: &dyn Transcoder) -> Result<()> {
        let raw = self.text.as_deref().ok_or_else(|| {
            Error::Normalization(format!("{:?} event from {} has no text", self.kind, self.user_id))
        })?;
        let (nice, lower) = normalize(raw, transcoder);
        self.text_nice = nice;
        self.text_lower = lower;
        Ok(())
    }

    /// Replace the raw text (button re-dispatch) and renormalize.
    pub(crate) fn substitute_text(
        &mut self,
        text: impl Into<String>,
        transcoder: &dyn Transcoder,
    ) -> Result<()> {
        self.text = Some(text.into());
        self.normalize_with(transcoder)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("text", &self.text)
            .field("user_id", &self.user_id)
            .field("channel", &self.channel.id())
            .field("extra", &self.extra)
            .finish()
    }
}
