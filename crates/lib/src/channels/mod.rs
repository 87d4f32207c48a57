//! Channel adapters and the contract they satisfy.
//!
//! An adapter turns platform events into [`Message`]s, hands them to the [`crate::Bot`], and
//! implements the send operations the bot calls back into. The core never talks to a platform API
//! directly.

mod console;
mod outbound;
mod registry;
mod webchat;

#[cfg(test)]
pub(crate) mod testing;

pub use console::{run_console, ConsoleChannel};
pub use outbound::{
    escape_html, format_buttons_as_text, link_display, link_domain, outbound_buttons, split_message,
    OutboundButton,
};
pub use registry::ChannelRegistry;
pub use webchat::{serve_webchat, webchat_router, ChatReply, ChatRequest, ChatResponse, WebchatChannel};

use crate::conversation::Button;
use crate::handler::Handler;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Platform limits an adapter advertises. Informational; the core does not enforce them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Specifications {
    pub max_message_length: Option<usize>,
    pub max_buttons: Option<usize>,
    pub max_button_label_length: Option<usize>,
}

/// A chat delivery channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel id (e.g. "webchat"). Also the prefix of its users' ids.
    fn id(&self) -> &str;

    fn specifications(&self) -> Specifications {
        Specifications::default()
    }

    async fn send_text(&self, message: &Message, text: &str, buttons: &[Button]) -> anyhow::Result<()>;

    async fn send_photo(&self, message: &Message, url: &str, buttons: &[Button]) -> anyhow::Result<()>;

    /// Default: the URL as text, followed by the caption.
    async fn send_link(
        &self,
        message: &Message,
        url: &str,
        buttons: &[Button],
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        let text = match caption {
            Some(c) if !c.trim().is_empty() => format!("{}\n{}", url, c),
            _ => url.to_string(),
        };
        self.send_text(message, &text, buttons).await
    }

    /// Channel-level catch-all, run when nothing else matched a text message.
    fn catch_all(&self) -> Option<Handler> {
        None
    }

    /// Handler for location events.
    fn location_handler(&self) -> Option<Handler> {
        None
    }

    /// Stop any background work (poll loops). Called on shutdown and on replacement.
    fn stop(&self) {}
}
