//! The ragline answer pipeline.
//!
//! A question flows through authorization, persistence of the question,
//! embedding, vector retrieval, context assembly and prompt rendering, and
//! ends as a token stream delivered to an [`AnswerSink`]. The answer is
//! then recorded by a background writer.
//!
//! [`AnswerSink`]: ragline_core::AnswerSink

pub mod auth;
pub mod chat_service;
pub mod context;
pub mod persistence;
pub mod pipeline;
pub mod prompt;
pub mod sources;
pub mod stream_event;

/// Scripted collaborators, compiled only for tests.
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use auth::AuthorizationGate;
pub use chat_service::ChatService;
pub use context::{BuiltContext, ContextAssembler, ContextEntry, estimate_tokens};
pub use persistence::{PersistenceSink, QueueSettings};
pub use pipeline::{PipelineSettings, RagPipeline, chat_title};
pub use prompt::PromptBuilder;
pub use sources::SourceExtractor;
pub use stream_event::{ChannelSink, StreamEvent};
