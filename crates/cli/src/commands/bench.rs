//! `ragline bench`: time similarity queries against the vector index.
//!
//! The query text is embedded once; every run then issues the same vector
//! query so the numbers reflect index latency only.

use std::time::{Duration, Instant};

use ragline_config::AppConfig;
use ragline_core::error::{Error, Result};
use ragline_providers::{
    EmbeddingClient, VectorRetriever, build_embedding_provider, build_vector_store,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct BenchSummary {
    pub runs: usize,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
}

pub fn summarize(samples: &[Duration]) -> Option<BenchSummary> {
    let min = samples.iter().min()?;
    let max = samples.iter().max()?;
    let total: Duration = samples.iter().sum();
    Some(BenchSummary {
        runs: samples.len(),
        avg: total / samples.len() as u32,
        min: *min,
        max: *max,
    })
}

pub async fn run(config: &AppConfig, query: &str, runs: usize, top_k: Option<usize>) -> Result<()> {
    if runs == 0 {
        return Err(Error::Validation("runs must be at least 1".into()));
    }
    let top_k = top_k.unwrap_or(config.rag.top_k);
    let retry = config.retry.policy();
    let cancel = CancellationToken::new();

    let embedding = EmbeddingClient::new(
        build_embedding_provider(&config.embedding)?,
        &config.embedding.model,
        retry.clone(),
    );
    let retriever = VectorRetriever::new(
        build_vector_store(&config.vector)?,
        config.vector.max_top_k,
        retry,
    );

    let started = Instant::now();
    let vector = embedding.create_embedding(&cancel, query).await?;
    println!(
        "embedding: {} dims in {:.1} ms",
        vector.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );

    let mut samples = Vec::with_capacity(runs);
    for i in 1..=runs {
        let started = Instant::now();
        let matches = retriever.query_similar(&cancel, &vector, top_k).await?;
        let elapsed = started.elapsed();
        println!(
            "run {i:>3}: {} matches in {:.1} ms",
            matches.len(),
            elapsed.as_secs_f64() * 1000.0
        );
        samples.push(elapsed);
    }

    if let Some(summary) = summarize(&samples) {
        println!(
            "\n{} runs  avg {:.1} ms  min {:.1} ms  max {:.1} ms",
            summary.runs,
            summary.avg.as_secs_f64() * 1000.0,
            summary.min.as_secs_f64() * 1000.0,
            summary.max.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}
