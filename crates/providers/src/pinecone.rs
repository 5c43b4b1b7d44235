//! Pinecone vector store over the data-plane REST API.

use async_trait::async_trait;
use ragline_core::error::ProviderError;
use ragline_core::vector::{ScoredVector, VectorQuery, VectorStore};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::openai_compat::check_status_or;

pub struct PineconeStore {
    host: String,
    namespace: String,
    api_key: String,
    client: reqwest::Client,
}

impl PineconeStore {
    /// `host` is the index host, with or without scheme.
    pub fn new(
        host: impl Into<String>,
        namespace: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let host = host.into();
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(ProviderError::NotConfigured("pinecone index host is empty".into()));
        }
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ProviderError::NotConfigured("pinecone api key is empty".into()));
        }

        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            host,
            namespace: namespace.into(),
            api_key,
            client,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<ScoredVector>, ProviderError> {
        let body = serde_json::json!({
            "vector": query.vector,
            "topK": query.top_k,
            "includeMetadata": query.include_metadata,
            "namespace": self.namespace,
        });

        debug!(namespace = %self.namespace, top_k = query.top_k, "Querying Pinecone");

        let response = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = check_status_or(response, |body| {
            ProviderError::IndexNotFound(format!(
                "pinecone index at {} (namespace '{}'): {body}",
                self.host, self.namespace
            ))
        })
        .await?;

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        parse_query_response(&text)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .post(format!("{}/describe_index_stats", self.host))
            .header("Api-Key", &self.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

fn parse_query_response(body: &str) -> Result<Vec<ScoredVector>, ProviderError> {
    let parsed: QueryResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedResponse(format!("pinecone query response: {e}")))?;

    Ok(parsed
        .matches
        .into_iter()
        .map(|m| ScoredVector {
            id: m.id.filter(|id| !id.is_empty()),
            score: m.score,
            metadata: m.metadata.unwrap_or_default(),
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    matches: Vec<Match>,
}

#[derive(Debug, Deserialize)]
struct Match {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}
