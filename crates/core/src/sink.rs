//! The caller's side of a streamed answer.
//!
//! Deltas and source references travel through separate callbacks so a
//! transport can render them independently (e.g. sources in a sidebar).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Coarse progress of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Embedding the question
    Understanding,
    /// Querying the vector index
    Searching,
    /// Waiting on the completion stream
    Thinking,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Understanding => "understanding",
            PipelineStage::Searching => "searching",
            PipelineStage::Thinking => "thinking",
        }
    }
}

#[async_trait]
pub trait AnswerSink: Send {
    /// A non-empty text delta, in provider arrival order.
    ///
    /// Returning an error aborts the stream; that error is what the
    /// pipeline returns.
    async fn on_delta(&mut self, delta: &str) -> Result<()>;

    /// Deduplicated source titles. Called at most once, before the first delta.
    async fn on_sources(&mut self, sources: &[String]) -> Result<()>;

    /// Progress notification. Ignored by default.
    async fn on_status(&mut self, _stage: PipelineStage) {}
}
