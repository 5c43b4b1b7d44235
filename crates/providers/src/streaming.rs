//! Streaming chat completion.
//!
//! Only opening the stream is retried. Once deltas have reached the caller
//! a failure is returned as-is: replaying the request would duplicate text
//! the caller has already rendered.

use ragline_core::error::{Error, Result};
use ragline_core::provider::{CompletionMessage, CompletionProvider, CompletionRequest};
use ragline_core::retry::RetryPolicy;
use ragline_core::sink::AnswerSink;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: "jabir-400b".into(),
            temperature: 0.1,
            top_p: Some(0.9),
            max_tokens: Some(2000),
        }
    }
}

pub struct StreamingCompletionClient {
    provider: Arc<dyn CompletionProvider>,
    settings: CompletionSettings,
    retry: RetryPolicy,
    span: Span,
}

impl StreamingCompletionClient {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        settings: CompletionSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            settings,
            retry,
            span: tracing::info_span!("completion_stream"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        &self.provider
    }

    fn request_for(&self, prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![CompletionMessage::user(prompt)],
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// Stream an answer for `prompt` into `sink` and return the full text.
    ///
    /// `sources` is handed to [`AnswerSink::on_sources`] once the stream is
    /// open, before the first delta, and only when non-empty. An error from
    /// `on_delta` stops the stream and is returned unchanged.
    pub async fn stream_chat_response(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        sources: &[String],
        sink: &mut dyn AnswerSink,
    ) -> Result<String> {
        let request = self.request_for(prompt);
        let provider = &self.provider;

        async {
            let mut rx = self
                .retry
                .execute(cancel, "completion_stream", |_| {
                    let request = request.clone();
                    async move { provider.stream(request).await }
                })
                .await?;

            if !sources.is_empty() {
                sink.on_sources(sources).await?;
            }

            let mut answer = String::new();
            let mut deltas = 0usize;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(deltas, "Stream cancelled by caller");
                        return Err(Error::Cancelled);
                    }
                    next = rx.recv() => next,
                };

                match next {
                    Some(Ok(chunk)) => {
                        if let Some(text) = chunk.text() {
                            sink.on_delta(text).await?;
                            answer.push_str(text);
                            deltas += 1;
                        }
                        if chunk.done {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(
                            provider = provider.name(),
                            deltas,
                            error = %e,
                            "Completion stream failed mid-answer"
                        );
                        return Err(Error::Provider(e));
                    }
                    // Producer went away without an explicit done marker
                    None => break,
                }
            }

            info!(
                provider = provider.name(),
                model = %self.settings.model,
                deltas,
                chars = answer.len(),
                "Completion stream finished"
            );
            Ok(answer)
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragline_core::error::ProviderError;
    use ragline_core::provider::{ChunkReceiver, StreamChunk};
    use ragline_core::sink::PipelineStage;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Emits a fixed chunk script; optionally fails the first `setup_failures` opens.
    struct ScriptedCompletion {
        chunks: Vec<std::result::Result<StreamChunk, ProviderError>>,
        setup_failures: usize,
        opens: AtomicUsize,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl ScriptedCompletion {
        fn new(chunks: Vec<std::result::Result<StreamChunk, ProviderError>>) -> Arc<Self> {
            Self::flaky(chunks, 0)
        }

        fn flaky(
            chunks: Vec<std::result::Result<StreamChunk, ProviderError>>,
            setup_failures: usize,
        ) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                setup_failures,
                opens: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletion {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<ChunkReceiver, ProviderError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            if n < self.setup_failures {
                return Err(ProviderError::Network("connect refused".into()));
            }
            *self.last_request.lock().unwrap() = Some(request);

            let (tx, rx) = tokio::sync::mpsc::channel(64);
            let chunks = self.chunks.clone();
            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        deltas: Vec<String>,
        sources: Vec<Vec<String>>,
        fail_on_call: Option<usize>,
        delta_calls: usize,
    }

    #[async_trait]
    impl AnswerSink for RecordingSink {
        async fn on_delta(&mut self, delta: &str) -> Result<()> {
            self.delta_calls += 1;
            if Some(self.delta_calls) == self.fail_on_call {
                return Err(Error::Delivery("client went away".into()));
            }
            self.deltas.push(delta.to_string());
            Ok(())
        }

        async fn on_sources(&mut self, sources: &[String]) -> Result<()> {
            self.sources.push(sources.to_vec());
            Ok(())
        }

        async fn on_status(&mut self, _stage: PipelineStage) {}
    }

    fn client(provider: Arc<ScriptedCompletion>) -> StreamingCompletionClient {
        StreamingCompletionClient::new(
            provider,
            CompletionSettings::default(),
            RetryPolicy::new(3, Duration::from_secs(1), Duration::from_millis(1)),
        )
    }

    fn deltas(texts: &[&str]) -> Vec<std::result::Result<StreamChunk, ProviderError>> {
        let mut chunks: Vec<_> = texts.iter().map(|t| Ok(StreamChunk::delta(*t))).collect();
        chunks.push(Ok(StreamChunk::done()));
        chunks
    }

    #[tokio::test]
    async fn forwards_non_empty_deltas_in_order() {
        let provider = ScriptedCompletion::new(deltas(&["Meto", "", "prolol", " 50mg"]));
        let mut sink = RecordingSink::default();

        let answer = client(provider)
            .stream_chat_response(&CancellationToken::new(), "prompt", &[], &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.deltas, vec!["Meto", "prolol", " 50mg"]);
        assert_eq!(answer, "Metoprolol 50mg");
        assert!(sink.sources.is_empty());
    }

    #[tokio::test]
    async fn third_delta_error_aborts_stream() {
        let provider = ScriptedCompletion::new(deltas(&["a", "b", "c", "d", "e"]));
        let mut sink = RecordingSink {
            fail_on_call: Some(3),
            ..Default::default()
        };

        let err = client(provider)
            .stream_chat_response(&CancellationToken::new(), "prompt", &[], &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Delivery(_)));
        assert_eq!(sink.delta_calls, 3);
        assert_eq!(sink.deltas, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn sources_sent_once_before_deltas() {
        let provider = ScriptedCompletion::new(deltas(&["x"]));
        let mut sink = RecordingSink::default();
        let sources = vec!["Metoprolol".to_string(), "Atenolol".to_string()];

        client(provider)
            .stream_chat_response(&CancellationToken::new(), "prompt", &sources, &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.sources, vec![sources]);
    }

    #[tokio::test]
    async fn mid_stream_error_is_returned_not_retried() {
        let provider = ScriptedCompletion::new(vec![
            Ok(StreamChunk::delta("partial")),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
        ]);
        let mut sink = RecordingSink::default();

        let err = client(provider.clone())
            .stream_chat_response(&CancellationToken::new(), "prompt", &[], &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Provider(ProviderError::StreamInterrupted(_))));
        assert_eq!(provider.opens.load(Ordering::SeqCst), 1);
        assert_eq!(sink.deltas, vec!["partial"]);
    }

    #[tokio::test]
    async fn stream_setup_is_retried() {
        let provider = ScriptedCompletion::flaky(deltas(&["ok"]), 2);
        let mut sink = RecordingSink::default();

        let answer = client(provider.clone())
            .stream_chat_response(&CancellationToken::new(), "prompt", &[], &mut sink)
            .await
            .unwrap();

        assert_eq!(answer, "ok");
        assert_eq!(provider.opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn request_carries_prompt_and_settings() {
        let provider = ScriptedCompletion::new(deltas(&[]));
        let mut sink = RecordingSink::default();

        client(provider.clone())
            .stream_chat_response(&CancellationToken::new(), "# Context\n[]", &[], &mut sink)
            .await
            .unwrap();

        let request = provider.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.model, "jabir-400b");
        assert_eq!(request.messages, vec![CompletionMessage::user("# Context\n[]")]);
        assert_eq!(request.max_tokens, Some(2000));
    }

    #[tokio::test]
    async fn cancellation_stops_a_stalled_stream() {
        struct Stalled;

        #[async_trait]
        impl CompletionProvider for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }

            async fn stream(
                &self,
                _request: CompletionRequest,
            ) -> std::result::Result<ChunkReceiver, ProviderError> {
                let (tx, rx) = tokio::sync::mpsc::channel(1);
                tokio::spawn(async move {
                    let _ = tx.send(Ok(StreamChunk::delta("first"))).await;
                    tx.closed().await;
                });
                Ok(rx)
            }
        }

        let client = StreamingCompletionClient::new(
            Arc::new(Stalled),
            CompletionSettings::default(),
            RetryPolicy::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut sink = RecordingSink::default();
        let err = client
            .stream_chat_response(&cancel, "prompt", &[], &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(sink.deltas, vec!["first"]);
    }
}
