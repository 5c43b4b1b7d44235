//! Chat and Message domain types.
//!
//! A [`Chat`] belongs to exactly one user. [`Message`]s are append-only and
//! ordered by creation time within their chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an authenticated user. Issued elsewhere; opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageKind::User),
            "assistant" => Some(MessageKind::Assistant),
            _ => None,
        }
    }
}

/// A conversation owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub user_id: UserId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Touched after each exchange.
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ChatId::new(),
            user_id,
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }
}

/// A single persisted message. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,

    pub chat_id: ChatId,

    #[serde(rename = "message_type")]
    pub kind: MessageKind,

    pub content: String,

    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new user message.
    pub fn user(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self::with_kind(chat_id, MessageKind::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self::with_kind(chat_id, MessageKind::Assistant, content)
    }

    fn with_kind(chat_id: ChatId, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id,
            kind,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
