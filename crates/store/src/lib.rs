//! Chat store implementations for ragline.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryChatStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteChatStore;
