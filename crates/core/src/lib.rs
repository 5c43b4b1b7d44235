//! # ragline core
//!
//! Domain types, traits, and error definitions for the ragline retrieval
//! pipeline. Nothing in here performs I/O: providers, vector backends and
//! chat stores are described as traits and implemented in their own crates.
//!
//! ## Layout
//!
//! - [`provider`]: embedding and streaming-completion provider contracts
//! - [`vector`]: nearest-neighbour search over a vector index
//! - [`store`]: chat and message persistence
//! - [`retry`]: the single bounded retry policy every outbound call goes through
//! - [`sink`]: callbacks through which an answer reaches the caller
//! - [`event`]: broadcast bus for pipeline side-effects (persistence outcomes)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod retry;
pub mod sink;
pub mod store;
pub mod vector;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, ProviderError, Result, StoreError};
pub use event::{DomainEvent, EventBus};
pub use message::{Chat, ChatId, Message, MessageKind, UserId};
pub use provider::{
    ChunkReceiver, CompletionMessage, CompletionProvider, CompletionRequest, EmbeddingProvider,
    EmbeddingRequest, EmbeddingResponse, StreamChunk, Usage,
};
pub use retry::RetryPolicy;
pub use sink::{AnswerSink, PipelineStage};
pub use store::ChatStore;
pub use vector::{ScoredVector, VectorQuery, VectorStore};
