//! Channel registry: register and lookup channels by id.

use super::Channel;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry of channel ids to adapters. Shared through the bot.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Channel>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register under the channel's own id. A channel already registered under that id is stopped.
    pub async fn register(&self, channel: Arc<dyn Channel>) {
        let id = channel.id().to_string();
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(id.clone(), channel) {
            log::debug!("channel {} replaced, stopping previous instance", id);
            old.stop();
        }
        log::info!("channel {} registered", id);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn Channel>> {
        let g = self.inner.read().await;
        g.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let g = self.inner.read().await;
        let mut ids: Vec<String> = g.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every registered channel.
    pub async fn stop_all(&self) {
        let g = self.inner.read().await;
        for (id, channel) in g.iter() {
            log::info!("stopping channel {}", id);
            channel.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::testing::NullChannel;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn replacing_a_channel_stops_the_old_one() {
        let registry = ChannelRegistry::new();
        let first = Arc::new(NullChannel::default());
        registry.register(first.clone()).await;
        registry.register(Arc::new(NullChannel::default())).await;

        assert!(first.stopped.load(Ordering::SeqCst));
        assert_eq!(registry.ids().await, vec!["null".to_string()]);
    }

    #[tokio::test]
    async fn stop_all_reaches_every_channel() {
        let registry = ChannelRegistry::new();
        let channel = Arc::new(NullChannel::default());
        registry.register(channel.clone()).await;
        registry.stop_all().await;
        assert!(channel.stopped.load(Ordering::SeqCst));
        assert!(registry.get("null").await.is_some());
    }
}
