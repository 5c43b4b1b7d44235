//! Chat ownership check. Runs before any state change or outbound call.

use std::sync::Arc;

use ragline_core::error::{Error, Result};
use ragline_core::message::{Chat, ChatId, UserId};
use ragline_core::store::ChatStore;
use tracing::warn;

pub struct AuthorizationGate {
    store: Arc<dyn ChatStore>,
}

impl AuthorizationGate {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Load `chat_id` and confirm `user_id` owns it.
    ///
    /// A missing chat and a chat owned by someone else are indistinguishable
    /// to the caller: both are `Unauthorized`.
    pub async fn authorize(&self, user_id: &UserId, chat_id: &ChatId) -> Result<Chat> {
        match self.store.find_chat(chat_id).await? {
            Some(chat) if chat.is_owned_by(user_id) => Ok(chat),
            found => {
                warn!(
                    user_id = %user_id,
                    chat_id = %chat_id,
                    exists = found.is_some(),
                    "Chat access denied"
                );
                Err(Error::Unauthorized {
                    user_id: user_id.to_string(),
                    chat_id: chat_id.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragline_store::InMemoryChatStore;

    #[tokio::test]
    async fn owner_is_authorized() {
        let store = Arc::new(InMemoryChatStore::new());
        let chat = store
            .create_chat(Chat::new(UserId::from("alice"), "t"))
            .await
            .unwrap();

        let gate = AuthorizationGate::new(store);
        let loaded = gate.authorize(&UserId::from("alice"), &chat.id).await.unwrap();
        assert_eq!(loaded.id, chat.id);
    }

    #[tokio::test]
    async fn other_user_and_unknown_chat_are_unauthorized() {
        let store = Arc::new(InMemoryChatStore::new());
        let chat = store
            .create_chat(Chat::new(UserId::from("alice"), "t"))
            .await
            .unwrap();
        let gate = AuthorizationGate::new(store);

        let err = gate.authorize(&UserId::from("mallory"), &chat.id).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));

        let err = gate
            .authorize(&UserId::from("alice"), &ChatId::from("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
    }
}
