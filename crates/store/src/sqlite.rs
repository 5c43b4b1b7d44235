//! SQLite chat store.
//!
//! Two tables:
//! - `chats`: one row per conversation, owned by a user
//! - `messages`: append-only; `seq` preserves insertion order within a chat
//!
//! Timestamps are stored as RFC 3339 text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ragline_core::error::StoreError;
use ragline_core::message::{Chat, ChatId, Message, MessageKind, UserId};
use ragline_core::store::ChatStore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    /// Open (or create) a database file.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Storage(format!("Cannot create {}: {e}", parent.display()))
                })?;
            }
        }

        let options = SqliteConnectOptions::new().filename(path);
        let store = Self::connect(options, 4).await?;
        info!("SQLite chat store initialized at {}", path.display());
        Ok(store)
    }

    /// Connect using a sqlx URL such as `sqlite::memory:` or `sqlite://chats.db`.
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?;
        // Every connection to :memory: is a separate database
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        Self::connect(options, max_connections).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id          TEXT PRIMARY KEY NOT NULL,
                user_id     TEXT NOT NULL,
                title       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chats table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                chat_id      TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                message_type TEXT NOT NULL CHECK (message_type IN ('user', 'assistant')),
                content      TEXT NOT NULL,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, updated_at DESC)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("chats index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, seq)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_chat(row: &sqlx::sqlite::SqliteRow) -> Result<Chat, StoreError> {
        let id: String = column(row, "id")?;
        let user_id: String = column(row, "user_id")?;
        let title: String = column(row, "title")?;
        let created_at: String = column(row, "created_at")?;
        let updated_at: String = column(row, "updated_at")?;

        Ok(Chat {
            id: ChatId(id),
            user_id: UserId(user_id),
            title,
            created_at: parse_timestamp("created_at", &created_at)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let id: String = column(row, "id")?;
        let chat_id: String = column(row, "chat_id")?;
        let kind: String = column(row, "message_type")?;
        let content: String = column(row, "content")?;
        let created_at: String = column(row, "created_at")?;

        let kind = MessageKind::parse(&kind)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown message_type '{kind}'")))?;

        Ok(Message {
            id,
            chat_id: ChatId(chat_id),
            kind,
            content,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    }
}

fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("{name} '{raw}': {e}")))
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_chat(&self, chat: Chat) -> Result<Chat, StoreError> {
        sqlx::query(
            "INSERT INTO chats (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chat.id.0)
        .bind(&chat.user_id.0)
        .bind(&chat.title)
        .bind(chat.created_at.to_rfc3339())
        .bind(chat.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert chat failed: {e}")))?;

        debug!(chat_id = %chat.id, user_id = %chat.user_id, "Chat created");
        Ok(chat)
    }

    async fn find_chat(&self, id: &ChatId) -> Result<Option<Chat>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, title, created_at, updated_at FROM chats WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Find chat failed: {e}")))?;

        row.as_ref().map(Self::row_to_chat).transpose()
    }

    async fn list_chats(&self, user_id: &UserId) -> Result<Vec<Chat>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, created_at, updated_at
            FROM chats
            WHERE user_id = ?
            ORDER BY updated_at DESC, created_at DESC
            "#,
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("List chats failed: {e}")))?;

        rows.iter().map(Self::row_to_chat).collect()
    }

    async fn touch_chat(&self, id: &ChatId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Touch chat failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("chat {id}")));
        }
        Ok(())
    }

    async fn delete_chat(&self, id: &ChatId) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("Begin failed: {e}")))?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Delete messages failed: {e}")))?;

        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Delete chat failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("Commit failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, chat_id, message_type, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.chat_id.0)
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert message failed: {e}")))?;

        Ok(())
    }

    async fn list_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, message_type, content, created_at
            FROM messages
            WHERE chat_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(&chat_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("List messages failed: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }
}
