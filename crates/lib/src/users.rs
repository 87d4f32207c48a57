//! User registry: channel-qualified user id -> conversation state.
//!
//! Users are created lazily on first contact and live until explicitly removed. Each user carries
//! a turn lock so that events for the same user are dispatched one at a time, while different users
//! proceed in parallel.

use crate::conversation::ConversationState;
use crate::message::{Message, UserId};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// One known user. Owned by the [`UserRegistry`].
#[derive(Debug)]
pub struct User {
    id: UserId,
    turn: Mutex<()>,
    state: Mutex<ConversationState>,
    /// User data kept in memory when no persistence store is configured.
    data: RwLock<Map<String, Value>>,
    last_message: RwLock<Option<Message>>,
}

impl User {
    fn new(id: UserId) -> Self {
        Self {
            id,
            turn: Mutex::new(()),
            state: Mutex::new(ConversationState::new()),
            data: RwLock::new(Map::new()),
            last_message: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lock the conversation state. Keep the guard short; never hold it across a handler call.
    pub async fn state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().await
    }

    /// Serialize dispatch for this user. Held by the dispatcher for a whole event.
    pub(crate) async fn begin_turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    pub async fn last_message(&self) -> Option<Message> {
        self.last_message.read().await.clone()
    }

    pub(crate) async fn set_last_message(&self, message: Message) {
        *self.last_message.write().await = Some(message);
    }

    pub(crate) async fn data(&self) -> Map<String, Value> {
        self.data.read().await.clone()
    }

    pub(crate) async fn set_data(&self, key: &str, value: Value) {
        self.data.write().await.insert(key.to_string(), value);
    }

    pub(crate) async fn clear_data(&self) {
        self.data.write().await.clear();
    }
}

/// Process-wide map of users. Shared by every adapter through the bot.
pub struct UserRegistry {
    inner: Arc<RwLock<HashMap<UserId, Arc<User>>>>,
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UserRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return the user, creating it on first contact.
    pub async fn get_or_create(&self, id: &str) -> Arc<User> {
        if let Some(user) = self.inner.read().await.get(id) {
            return user.clone();
        }
        let mut g = self.inner.write().await;
        // Another task may have inserted it between the two locks.
        g.entry(id.to_string())
            .or_insert_with(|| {
                log::debug!("new user {}", id);
                Arc::new(User::new(id.to_string()))
            })
            .clone()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<User>> {
        self.inner.read().await.get(id).cloned()
    }

    /// Forget a user and its conversation state. Waits for the user's in-flight dispatch to
    /// finish, so it must not be called from that user's own handler.
    pub async fn remove(&self, id: &str) -> Option<Arc<User>> {
        let user = self.get(id).await?;
        let _turn = user.begin_turn().await;
        let mut inner = self.inner.write().await;
        let same = inner
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &user));
        if same {
            inner.remove(id)
        } else {
            None
        }
    }

    pub async fn ids(&self) -> Vec<UserId> {
        self.inner.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
