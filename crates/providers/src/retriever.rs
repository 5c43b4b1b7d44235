//! Top-K retrieval against whichever [`VectorStore`] is configured.

use ragline_core::error::{Error, ProviderError, Result};
use ragline_core::retry::RetryPolicy;
use ragline_core::vector::{ScoredVector, VectorQuery, VectorStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, info};

pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    max_top_k: usize,
    retry: RetryPolicy,
    span: Span,
}

impl VectorRetriever {
    pub fn new(store: Arc<dyn VectorStore>, max_top_k: usize, retry: RetryPolicy) -> Self {
        Self {
            store,
            max_top_k,
            retry,
            span: tracing::info_span!("vector_retriever"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Fetch the `top_k` nearest neighbours of `embedding`.
    ///
    /// `top_k` above the configured ceiling fails with a non-retryable
    /// `InvalidArgument` before any request is made.
    pub async fn query_similar(
        &self,
        cancel: &CancellationToken,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredVector>> {
        if top_k == 0 || top_k > self.max_top_k {
            return Err(Error::Provider(ProviderError::InvalidArgument(format!(
                "top_k must be between 1 and {} (got {top_k})",
                self.max_top_k
            ))));
        }
        if embedding.is_empty() {
            return Err(Error::Provider(ProviderError::InvalidArgument(
                "query embedding is empty".into(),
            )));
        }

        let store = &self.store;
        async {
            let matches = self
                .retry
                .execute(cancel, "vector_query", |_| {
                    let query = VectorQuery::new(embedding.to_vec(), top_k);
                    async move { store.query(query).await }
                })
                .await?;

            info!(backend = store.name(), top_k, matches = matches.len(), "Vector query complete");
            Ok(matches)
        }
        .instrument(self.span.clone())
        .await
    }
}
