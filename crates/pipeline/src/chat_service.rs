//! Chat history operations, all scoped to the requesting user.

use std::sync::Arc;

use ragline_core::error::{Error, Result};
use ragline_core::message::{Chat, ChatId, Message, UserId};
use ragline_core::store::ChatStore;
use tracing::info;

use crate::auth::AuthorizationGate;
use crate::persistence::PersistenceSink;

pub struct ChatService {
    store: Arc<dyn ChatStore>,
    gate: AuthorizationGate,
    persistence: Arc<PersistenceSink>,
}

impl ChatService {
    pub fn new(persistence: Arc<PersistenceSink>) -> Self {
        let store = persistence.store().clone();
        Self {
            gate: AuthorizationGate::new(store.clone()),
            store,
            persistence,
        }
    }

    /// Most recently updated first.
    pub async fn list_chats(&self, user_id: &UserId) -> Result<Vec<Chat>> {
        Ok(self.store.list_chats(user_id).await?)
    }

    pub async fn create_chat(&self, user_id: &UserId, title: &str) -> Result<Chat> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::Validation("chat title must not be empty".into()));
        }
        self.persistence.create_chat(user_id, title).await
    }

    /// Messages in creation order. The user must own the chat.
    pub async fn chat_messages(&self, user_id: &UserId, chat_id: &ChatId) -> Result<Vec<Message>> {
        self.gate.authorize(user_id, chat_id).await?;
        Ok(self.store.list_messages(chat_id).await?)
    }

    /// Remove the chat and its messages. The user must own the chat.
    pub async fn delete_chat(&self, user_id: &UserId, chat_id: &ChatId) -> Result<()> {
        self.gate.authorize(user_id, chat_id).await?;
        self.store.delete_chat(chat_id).await?;
        info!(chat_id = %chat_id, user_id = %user_id, "Chat deleted");
        Ok(())
    }
}
