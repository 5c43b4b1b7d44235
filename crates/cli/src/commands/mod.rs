pub mod ask;
pub mod bench;
pub mod chats;
pub mod config_cmd;
pub mod doctor;
pub mod init;

use std::sync::Arc;
use std::time::Duration;

use ragline_config::{AppConfig, PersistenceBackend};
use ragline_core::error::{Result, StoreError};
use ragline_core::event::EventBus;
use ragline_core::store::ChatStore;
use ragline_pipeline::{ChatService, PersistenceSink, QueueSettings};
use ragline_store::{InMemoryChatStore, SqliteChatStore};
use tracing::debug;

/// Open the chat store selected by `persistence.backend`.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn ChatStore>> {
    match config.persistence.backend {
        PersistenceBackend::Sqlite => {
            let path = config.persistence.database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Storage(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
            debug!(path = %path.display(), "Opening SQLite chat store");
            Ok(Arc::new(SqliteChatStore::open(&path).await?))
        }
        PersistenceBackend::Memory => Ok(Arc::new(InMemoryChatStore::new())),
    }
}

/// Start the persistence sink over the configured store.
pub async fn open_persistence(config: &AppConfig) -> Result<Arc<PersistenceSink>> {
    let store = open_store(config).await?;
    let settings = QueueSettings {
        capacity: config.persistence.queue_capacity,
        enqueue_timeout: Duration::from_millis(config.persistence.enqueue_timeout_ms),
    };
    Ok(Arc::new(PersistenceSink::new(
        store,
        Arc::new(EventBus::default()),
        settings,
    )))
}

pub async fn open_chat_service(config: &AppConfig) -> Result<ChatService> {
    Ok(ChatService::new(open_persistence(config).await?))
}
