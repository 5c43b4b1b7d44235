//! Pipeline streaming events.
//!
//! `StreamEvent` folds the sink callbacks into one ordered stream that a
//! transport (SSE, WebSocket, terminal) can forward as-is:
//! - `delta`: partial answer text
//! - `sources`: deduplicated source titles, at most once, before any delta
//! - `status`: pipeline stage change
//! - `done`: the answer is complete
//! - `error`: the run failed; carries only the public classification

use async_trait::async_trait;
use ragline_core::error::{Error, ErrorKind, Result};
use ragline_core::sink::{AnswerSink, PipelineStage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Delta { content: String },

    Sources { sources: Vec<String> },

    Status { stage: PipelineStage },

    Done { chat_id: String },

    Error { kind: ErrorKind, message: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::Sources { .. } => "sources",
            Self::Status { .. } => "status",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Public form of a pipeline error. Provider detail is not included.
    pub fn from_error(error: &Error) -> Self {
        let kind = error.kind();
        Self::Error {
            kind,
            message: kind.public_message().to_string(),
        }
    }
}

/// Forwards sink callbacks into an `mpsc` channel.
///
/// Once the receiver is gone, the next delta fails with `Delivery`, which
/// stops the stream.
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    async fn forward(&self, event: StreamEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::Delivery("stream receiver dropped".into()))
    }
}

#[async_trait]
impl AnswerSink for ChannelSink {
    async fn on_delta(&mut self, delta: &str) -> Result<()> {
        self.forward(StreamEvent::Delta {
            content: delta.to_string(),
        })
        .await
    }

    async fn on_sources(&mut self, sources: &[String]) -> Result<()> {
        self.forward(StreamEvent::Sources {
            sources: sources.to_vec(),
        })
        .await
    }

    async fn on_status(&mut self, stage: PipelineStage) {
        let _ = self.forward(StreamEvent::Status { stage }).await;
    }
}
