//! Scripted collaborators for pipeline tests.

use async_trait::async_trait;
use ragline_config::{AppConfig, VectorBackend};
use ragline_core::error::{Error, ProviderError, Result};
use ragline_core::provider::{
    ChunkReceiver, CompletionProvider, CompletionRequest, EmbeddingProvider, EmbeddingRequest,
    EmbeddingResponse, StreamChunk,
};
use ragline_core::sink::{AnswerSink, PipelineStage};
use ragline_core::vector::{ScoredVector, VectorQuery, VectorStore};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Defaults with a millisecond backoff so retry paths run fast.
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.vector.backend = Some(VectorBackend::Memory);
    config.retry.backoff_ms = 1;
    config.retry.attempt_timeout_secs = 5;
    config
}

/// Build a match with the usual metadata fields.
pub fn scored(id: &str, score: f32, source_file: &str, text: &str) -> ScoredVector {
    let mut metadata = serde_json::Map::new();
    metadata.insert("source_file".into(), source_file.into());
    metadata.insert("section_heading".into(), "Dosage".into());
    metadata.insert("text".into(), text.into());
    ScoredVector {
        id: Some(id.into()),
        score,
        metadata,
    }
}

/// Returns a fixed vector; fails the first `failures` calls with a network error.
pub struct MockEmbedder {
    vector: Vec<f32>,
    failures: usize,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self::flaky(vector, 0)
    }

    pub fn flaky(vector: Vec<f32>, failures: usize) -> Self {
        Self {
            vector,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        "mock_embedder"
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(ProviderError::Network("connection reset".into()));
        }
        Ok(EmbeddingResponse {
            embeddings: vec![self.vector.clone()],
            model: request.model,
            usage: None,
        })
    }
}

/// Returns the same matches for every query, truncated to `top_k`.
pub struct MockVectorStore {
    matches: Vec<ScoredVector>,
    calls: AtomicUsize,
}

impl MockVectorStore {
    pub fn new(matches: Vec<ScoredVector>) -> Self {
        Self {
            matches,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    fn name(&self) -> &str {
        "mock_vectors"
    }

    async fn query(&self, query: VectorQuery) -> std::result::Result<Vec<ScoredVector>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.matches.iter().take(query.top_k).cloned().collect())
    }
}

/// How a [`MockCompleter`] stream behaves after its deltas.
#[derive(Debug, Clone)]
pub enum StreamEnding {
    Done,
    Fail(ProviderError),
    /// Keep the stream open until the receiver is dropped.
    Hang,
}

/// Streams scripted deltas and records every prompt it was given.
pub struct MockCompleter {
    deltas: Vec<String>,
    ending: StreamEnding,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockCompleter {
    pub fn new(deltas: &[&str]) -> Self {
        Self::ending(deltas, StreamEnding::Done)
    }

    pub fn ending(deltas: &[&str], ending: StreamEnding) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            ending,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionProvider for MockCompleter {
    fn name(&self) -> &str {
        "mock_completer"
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.extend(request.messages.into_iter().map(|m| m.content));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let deltas = self.deltas.clone();
        let ending = self.ending.clone();
        tokio::spawn(async move {
            for delta in deltas {
                if tx.send(Ok(StreamChunk::delta(delta))).await.is_err() {
                    return;
                }
            }
            match ending {
                StreamEnding::Done => {
                    let _ = tx.send(Ok(StreamChunk::done())).await;
                }
                StreamEnding::Fail(e) => {
                    let _ = tx.send(Err(e)).await;
                }
                StreamEnding::Hang => tx.closed().await,
            }
        });
        Ok(rx)
    }
}

/// Records every callback; optionally fails the n-th delta (1-based).
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub deltas: Vec<String>,
    pub sources: Vec<Vec<String>>,
    pub stages: Vec<PipelineStage>,
    /// Callback names in call order
    pub calls: Vec<&'static str>,
    pub fail_on_delta: Option<usize>,
    delta_calls: usize,
}

impl RecordingSink {
    pub fn failing_on(n: usize) -> Self {
        Self {
            fail_on_delta: Some(n),
            ..Default::default()
        }
    }

    pub fn delta_calls(&self) -> usize {
        self.delta_calls
    }

    pub fn answer(&self) -> String {
        self.deltas.concat()
    }
}

#[async_trait]
impl AnswerSink for RecordingSink {
    async fn on_delta(&mut self, delta: &str) -> Result<()> {
        self.delta_calls += 1;
        self.calls.push("delta");
        if self.fail_on_delta == Some(self.delta_calls) {
            return Err(Error::Delivery("client disconnected".into()));
        }
        self.deltas.push(delta.to_string());
        Ok(())
    }

    async fn on_sources(&mut self, sources: &[String]) -> Result<()> {
        self.calls.push("sources");
        self.sources.push(sources.to_vec());
        Ok(())
    }

    async fn on_status(&mut self, stage: PipelineStage) {
        self.calls.push("status");
        self.stages.push(stage);
    }
}
