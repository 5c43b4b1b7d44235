//! In-memory chat store for tests and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use ragline_core::error::StoreError;
use ragline_core::message::{Chat, ChatId, Message, UserId};
use ragline_core::store::ChatStore;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    chats: Vec<Chat>,
    messages: Vec<Message>,
}

/// Keeps chats and messages in two Vecs behind one lock.
#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages across all chats.
    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_chat(&self, chat: Chat) -> Result<Chat, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.chats.iter().any(|c| c.id == chat.id) {
            return Err(StoreError::Storage(format!("chat {} already exists", chat.id)));
        }
        tables.chats.push(chat.clone());
        Ok(chat)
    }

    async fn find_chat(&self, id: &ChatId) -> Result<Option<Chat>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.chats.iter().find(|c| &c.id == id).cloned())
    }

    async fn list_chats(&self, user_id: &UserId) -> Result<Vec<Chat>, StoreError> {
        let tables = self.tables.read().await;
        let mut chats: Vec<Chat> = tables
            .chats
            .iter()
            .filter(|c| &c.user_id == user_id)
            .cloned()
            .collect();
        chats.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(chats)
    }

    async fn touch_chat(&self, id: &ChatId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let chat = tables
            .chats
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("chat {id}")))?;
        chat.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_chat(&self, id: &ChatId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.chats.len();
        tables.chats.retain(|c| &c.id != id);
        tables.messages.retain(|m| &m.chat_id != id);
        Ok(tables.chats.len() < before)
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.chats.iter().any(|c| c.id == message.chat_id) {
            return Err(StoreError::NotFound(format!("chat {}", message.chat_id)));
        }
        tables.messages.push(message);
        Ok(())
    }

    async fn list_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| &m.chat_id == chat_id)
            .cloned()
            .collect())
    }
}
