//! Minimal channel for unit tests.

use super::Channel;
use crate::conversation::Button;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct NullChannel {
    pub(crate) stopped: AtomicBool,
}

impl NullChannel {
    pub(crate) fn arc() -> Arc<dyn Channel> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Channel for NullChannel {
    fn id(&self) -> &str {
        "null"
    }

    async fn send_text(&self, _message: &Message, _text: &str, _buttons: &[Button]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_photo(&self, _message: &Message, _url: &str, _buttons: &[Button]) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
