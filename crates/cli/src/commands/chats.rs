//! `ragline chats`, `history` and `delete`.

use ragline_config::AppConfig;
use ragline_core::error::Result;
use ragline_core::message::{ChatId, UserId};

pub async fn list(config: &AppConfig, user: &UserId) -> Result<()> {
    let service = super::open_chat_service(config).await?;
    let chats = service.list_chats(user).await?;

    if chats.is_empty() {
        println!("No chats yet. Start one with `ragline ask <question>`.");
        return Ok(());
    }

    for chat in chats {
        println!(
            "{}  {}  {}",
            chat.id,
            chat.updated_at.format("%Y-%m-%d %H:%M"),
            chat.title
        );
    }
    Ok(())
}

pub async fn history(config: &AppConfig, user: &UserId, chat_id: &str) -> Result<()> {
    let service = super::open_chat_service(config).await?;
    let messages = service.chat_messages(user, &ChatId::from(chat_id)).await?;

    for message in messages {
        println!(
            "[{}] {}\n{}\n",
            message.kind.as_str(),
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
            message.content
        );
    }
    Ok(())
}

pub async fn delete(config: &AppConfig, user: &UserId, chat_id: &str) -> Result<()> {
    let service = super::open_chat_service(config).await?;
    service.delete_chat(user, &ChatId::from(chat_id)).await?;
    println!("Deleted chat {chat_id}");
    Ok(())
}
