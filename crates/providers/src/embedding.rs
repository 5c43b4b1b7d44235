//! Query embedding with retry.

use ragline_core::error::{Error, ProviderError, Result};
use ragline_core::provider::{EmbeddingProvider, EmbeddingRequest};
use ragline_core::retry::RetryPolicy;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug};

/// Turns question text into a single embedding vector.
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    model: String,
    retry: RetryPolicy,
    span: Span,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            model: model.into(),
            retry,
            span: tracing::info_span!("embedding_client"),
        }
    }

    /// Log under `span` instead of the default `embedding_client` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed `text`. A zero-length vector from the provider counts as a
    /// retryable empty response.
    pub async fn create_embedding(&self, cancel: &CancellationToken, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::Validation("embedding input must not be empty".into()));
        }

        let provider = &self.provider;
        let model = &self.model;

        async {
            let vector = self
                .retry
                .execute(cancel, "embedding", |_| {
                    let request = EmbeddingRequest {
                        model: model.clone(),
                        inputs: vec![text.to_string()],
                    };
                    async move {
                        let response = provider.embed(request).await?;
                        match response.embeddings.into_iter().next() {
                            Some(v) if !v.is_empty() => Ok(v),
                            _ => Err(ProviderError::EmptyResponse {
                                operation: "embedding".into(),
                            }),
                        }
                    }
                })
                .await?;

            debug!(provider = provider.name(), dimensions = vector.len(), "Embedding created");
            Ok(vector)
        }
        .instrument(self.span.clone())
        .await
    }
}
