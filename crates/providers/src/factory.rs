//! Builds providers and clients from configuration.

use std::sync::Arc;

use ragline_config::{AppConfig, CompletionConfig, EmbeddingConfig, VectorBackend, VectorConfig};
use ragline_core::error::{Error, ProviderError, Result};
use ragline_core::provider::{CompletionProvider, EmbeddingProvider};
use ragline_core::vector::VectorStore;
use tracing::info;

use crate::embedding::EmbeddingClient;
use crate::memory_store::MemoryVectorStore;
use crate::openai_compat::OpenAiCompatProvider;
use crate::pinecone::PineconeStore;
use crate::qdrant::QdrantStore;
use crate::retriever::VectorRetriever;
use crate::streaming::{CompletionSettings, StreamingCompletionClient};

/// The three remote-facing clients a pipeline needs.
pub struct RagClients {
    pub embedding: EmbeddingClient,
    pub retriever: VectorRetriever,
    pub completion: StreamingCompletionClient,
}

pub fn build_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        Error::Provider(ProviderError::NotConfigured(
            "embedding api key missing (set RAGLINE_EMBEDDING_API_KEY or OPENAI_API_KEY)".into(),
        ))
    })?;
    let provider = OpenAiCompatProvider::new("embedding", &config.base_url, api_key)?;
    Ok(Arc::new(provider))
}

pub fn build_completion_provider(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        Error::Provider(ProviderError::NotConfigured(
            "completion api key missing (set RAGLINE_COMPLETION_API_KEY or OPENAI_API_KEY)".into(),
        ))
    })?;
    let provider = OpenAiCompatProvider::new("completion", &config.base_url, api_key)?;
    Ok(Arc::new(provider))
}

/// Build the vector store named by `vector.backend`. There is no fallback:
/// an unset backend is a configuration error.
pub fn build_vector_store(config: &VectorConfig) -> Result<Arc<dyn VectorStore>> {
    let backend = config.backend.ok_or_else(|| Error::Config {
        message: "vector.backend is not set; choose one of qdrant, pinecone, memory".into(),
    })?;

    let store: Arc<dyn VectorStore> = match backend {
        VectorBackend::Qdrant => Arc::new(QdrantStore::new(
            &config.url,
            &config.collection,
            config.api_key.clone(),
        )?),
        VectorBackend::Pinecone => Arc::new(PineconeStore::new(
            &config.url,
            &config.namespace,
            config.api_key.clone().unwrap_or_default(),
        )?),
        VectorBackend::Memory => match &config.seed_file {
            Some(path) => Arc::new(MemoryVectorStore::load_json(path)?),
            None => Arc::new(MemoryVectorStore::new()),
        },
    };

    info!(backend = %backend, "Vector store ready");
    Ok(store)
}

impl RagClients {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let vector_store = build_vector_store(&config.vector)?;
        Ok(Self::with_parts(
            config,
            build_embedding_provider(&config.embedding)?,
            vector_store,
            build_completion_provider(&config.completion)?,
        ))
    }

    /// Wire explicit providers with the retry and sampling settings from `config`.
    pub fn with_parts(
        config: &AppConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        let retry = config.retry.policy();
        let settings = CompletionSettings {
            model: config.completion.model.clone(),
            temperature: config.completion.temperature,
            top_p: Some(config.completion.top_p),
            max_tokens: Some(config.completion.max_tokens),
        };

        Self {
            embedding: EmbeddingClient::new(embedder, &config.embedding.model, retry.clone()),
            retriever: VectorRetriever::new(vector_store, config.vector.max_top_k, retry.clone()),
            completion: StreamingCompletionClient::new(completer, settings, retry),
        }
    }
}
