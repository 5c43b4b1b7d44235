//! Chat store trait: persistence of chats and their messages.
//!
//! Implementations: SQLite and in-memory (for testing), in `ragline-store`.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{Chat, ChatId, Message, UserId};

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Insert a new chat.
    async fn create_chat(&self, chat: Chat) -> std::result::Result<Chat, StoreError>;

    /// Load a chat by id.
    async fn find_chat(&self, id: &ChatId) -> std::result::Result<Option<Chat>, StoreError>;

    /// All chats of a user, most recently updated first.
    async fn list_chats(&self, user_id: &UserId) -> std::result::Result<Vec<Chat>, StoreError>;

    /// Set `updated_at` to now without rewriting the row.
    async fn touch_chat(&self, id: &ChatId) -> std::result::Result<(), StoreError>;

    /// Delete a chat and its messages. Returns whether it existed.
    async fn delete_chat(&self, id: &ChatId) -> std::result::Result<bool, StoreError>;

    /// Append a message to its chat.
    async fn append_message(&self, message: Message) -> std::result::Result<(), StoreError>;

    /// Messages of a chat in creation order.
    async fn list_messages(&self, chat_id: &ChatId) -> std::result::Result<Vec<Message>, StoreError>;
}
