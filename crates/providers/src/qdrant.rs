//! Qdrant vector store over the REST API.
//!
//! Uses the universal query endpoint:
//! `POST {url}/collections/{collection}/points/query`.

use async_trait::async_trait;
use ragline_core::error::ProviderError;
use ragline_core::vector::{ScoredVector, VectorQuery, VectorStore};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::openai_compat::check_status_or;

pub struct QdrantStore {
    base_url: String,
    collection: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantStore {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ProviderError::NotConfigured("qdrant url is empty".into()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            collection: collection.into(),
            api_key,
            client,
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Api-Key", key),
            None => request,
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<ScoredVector>, ProviderError> {
        let url = format!(
            "{}/collections/{}/points/query",
            self.base_url, self.collection
        );
        let body = serde_json::json!({
            "query": query.vector,
            "limit": query.top_k,
            "with_payload": query.include_metadata,
        });

        debug!(collection = %self.collection, top_k = query.top_k, "Querying Qdrant");

        let response = self
            .with_auth(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let response = check_status_or(response, |body| {
            ProviderError::IndexNotFound(format!(
                "qdrant collection '{}' at {}: {body}",
                self.collection, self.base_url
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
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

fn parse_query_response(body: &str) -> Result<Vec<ScoredVector>, ProviderError> {
    let parsed: QueryResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedResponse(format!("qdrant query response: {e}")))?;

    Ok(parsed
        .result
        .points
        .into_iter()
        .map(|p| ScoredVector {
            id: point_id(&p.id),
            score: p.score,
            metadata: p.payload.unwrap_or_default(),
        })
        .collect())
}

/// Qdrant ids are either unsigned integers or UUID strings.
fn point_id(id: &serde_json::Value) -> Option<String> {
    match id {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    points: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    #[serde(default)]
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Map<String, serde_json::Value>>,
}
