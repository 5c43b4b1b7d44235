//! In-process vector index using brute-force cosine similarity.
//!
//! Intended for tests, demos and small offline corpora. Records can be
//! seeded from a JSON file of `{id, vector, metadata}` objects.

use async_trait::async_trait;
use ragline_core::error::ProviderError;
use ragline_core::vector::{ScoredVector, VectorQuery, VectorStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A stored vector with its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Default)]
pub struct MemoryVectorStore {
    records: Arc<RwLock<Vec<VectorRecord>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<VectorRecord>) -> Self {
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Load records from a JSON array on disk.
    pub fn load_json(path: &Path) -> Result<Self, ProviderError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::NotConfigured(format!("cannot read {}: {e}", path.display()))
        })?;
        let records: Vec<VectorRecord> = serde_json::from_str(&content).map_err(|e| {
            ProviderError::MalformedResponse(format!("{}: {e}", path.display()))
        })?;
        Ok(Self::from_records(records))
    }

    pub async fn insert(&self, record: VectorRecord) {
        self.records.write().await.push(record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query(&self, query: VectorQuery) -> Result<Vec<ScoredVector>, ProviderError> {
        let records = self.records.read().await;

        let mut scored: Vec<ScoredVector> = records
            .iter()
            .filter(|r| r.vector.len() == query.vector.len())
            .map(|r| ScoredVector {
                id: r.id.clone(),
                score: cosine_similarity(&r.vector, &query.vector),
                metadata: if query.include_metadata {
                    r.metadata.clone()
                } else {
                    serde_json::Map::new()
                },
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(query.top_k);
        Ok(scored)
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}
