//! Console channel: one local user on stdin/stdout.
//!
//! Buttons are printed numbered; typing a shown number clicks that button.

use super::outbound::format_buttons_as_text;
use super::Channel;
use crate::bot::Bot;
use crate::conversation::Button;
use crate::message::Message;
use anyhow::Context as _;
use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

pub struct ConsoleChannel {
    user: String,
    out: Mutex<Box<dyn Write + Send>>,
    /// Payloads of the buttons shown last, by position.
    shown: Mutex<Vec<String>>,
    stopped: AtomicBool,
}

impl ConsoleChannel {
    /// Console for raw user id `user`, writing to stdout.
    pub fn new(user: impl Into<String>) -> Self {
        Self::with_writer(user, Box::new(std::io::stdout()))
    }

    pub fn with_writer(user: impl Into<String>, out: Box<dyn Write + Send>) -> Self {
        Self {
            user: user.into(),
            out: Mutex::new(out),
            shown: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn write(&self, text: &str) -> anyhow::Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).context("writing to console")?;
        out.flush().context("flushing console")?;
        Ok(())
    }

    async fn show(&self, text: &str, buttons: &[Button]) -> anyhow::Result<()> {
        *self.shown.lock().await = buttons.iter().map(|b| b.payload().to_string()).collect();
        let rendered = format!("{}{}\n", text, format_buttons_as_text(buttons, true));
        self.write(&rendered).await
    }

    /// Turn an input line into an event: a shown button's number is a click, anything else text.
    async fn message_for(self: &Arc<Self>, line: &str) -> Message {
        let shown = std::mem::take(&mut *self.shown.lock().await);
        let channel: Arc<dyn Channel> = self.clone();
        let clicked = line
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| shown.get(i));
        match clicked {
            Some(payload) => Message::button_click(channel, &self.user, payload.clone()),
            None => Message::text(channel, &self.user, line),
        }
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn id(&self) -> &str {
        "console"
    }

    async fn send_text(&self, _message: &Message, text: &str, buttons: &[Button]) -> anyhow::Result<()> {
        self.show(text, buttons).await
    }

    async fn send_photo(&self, _message: &Message, url: &str, buttons: &[Button]) -> anyhow::Result<()> {
        self.show(&format!("[photo] {}", url), buttons).await
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Read stdin until EOF, `/exit` or `/quit`, dispatching each line.
pub async fn run_console(bot: Bot, channel: Arc<ConsoleChannel>, prompt: &str) -> anyhow::Result<()> {
    run_console_with(bot, channel, prompt, BufReader::new(tokio::io::stdin())).await
}

pub(crate) async fn run_console_with<R>(
    bot: Bot,
    channel: Arc<ConsoleChannel>,
    prompt: &str,
    input: R,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    bot.register_channel(channel.clone()).await;
    let mut lines = input.lines();
    loop {
        if channel.is_stopped() {
            break;
        }
        channel.write(prompt).await?;
        let Some(line) = lines.next_line().await.context("reading console input")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" || line == "/quit" {
            break;
        }
        let message = channel.message_for(line).await;
        match bot.handle_event(message).await {
            Ok(outcome) if !outcome.handled() => channel.write("(no reply)\n").await?,
            Ok(_) => {}
            Err(e) => {
                log::warn!("console: dispatch failed: {}", e);
                channel.write(&format!("error: {}\n", e)).await?;
            }
        }
    }
    bot.shutdown().await;
    Ok(())
}
