//! Vector index abstraction.
//!
//! Qdrant, Pinecone and the in-memory index are interchangeable behind
//! [`VectorStore`]; which one runs is decided by configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A nearest-neighbour match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredVector {
    /// Native identifier in the index, when the backend returns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Similarity score (higher is closer).
    pub score: f32,

    /// Arbitrary payload stored alongside the vector.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A similarity query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    #[serde(default = "default_include_metadata")]
    pub include_metadata: bool,
}

fn default_include_metadata() -> bool {
    true
}

impl VectorQuery {
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            include_metadata: default_include_metadata(),
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The backend name (e.g., "qdrant", "pinecone", "memory").
    fn name(&self) -> &str;

    /// Return up to `top_k` matches, best first.
    async fn query(&self, query: VectorQuery) -> std::result::Result<Vec<ScoredVector>, ProviderError>;

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
