//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, vLLM, Ollama and any gateway exposing
//! `/embeddings` and streaming `/chat/completions`.
//!
//! Supports:
//! - Embeddings
//! - Streaming chat completions (SSE)
//! - Health checks via `/models`

use async_trait::async_trait;
use futures::StreamExt;
use ragline_core::error::ProviderError;
use ragline_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible embedding and completion provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// No client-level timeout is set: per-attempt deadlines come from the
    /// retry policy, and a stream may legitimately run for minutes.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        accept_sse: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if accept_sse {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        check_status(response).await
    }
}

/// Map a non-200 response onto the provider error taxonomy.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    check_status_or(response, ProviderError::ModelNotFound).await
}

/// Like [`check_status`], with `not_found` building the error for a 404 body.
pub(crate) async fn check_status_or<F>(
    response: reqwest::Response,
    not_found: F,
) -> Result<reqwest::Response, ProviderError>
where
    F: FnOnce(String) -> ProviderError,
{
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if status == 404 {
        let body = response.text().await.unwrap_or_default();
        return Err(not_found(body));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let body = serde_json::json!({
            "model": request.model,
            "input": request.inputs,
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %request.model,
            count = request.inputs.len(),
            "Sending embedding request"
        );

        let response = self.post_json("/embeddings", &body, false).await?;

        let api_resp: EmbeddingApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("embedding response: {e}")))?;

        let mut data = api_resp.data;
        data.sort_by_key(|d| d.index);
        let embeddings = data.into_iter().map(|d| d.embedding).collect();

        let usage = api_resp.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: 0,
            total_tokens: u.total_tokens,
        });

        Ok(EmbeddingResponse {
            embeddings,
            model: api_resp.model,
            usage,
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        models_reachable(&self.client, &self.base_url, &self.api_key).await
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post_json("/chat/completions", &body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream on its own task
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        trace!(provider = %provider_name, "Stream receiver dropped");
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let Some(chunk_result) = next else { break };
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for chunk in decoder.push(&bytes) {
                    let done = chunk.done;
                    if tx.send(Ok(chunk)).await.is_err() || done {
                        return;
                    }
                }
            }

            // Stream ended without [DONE]; the last line may lack its newline
            for chunk in decoder.finish() {
                let done = chunk.done;
                if tx.send(Ok(chunk)).await.is_err() || done {
                    return;
                }
            }
            let _ = tx.send(Ok(StreamChunk::done())).await;
        });

        Ok(rx)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        models_reachable(&self.client, &self.base_url, &self.api_key).await
    }
}

async fn models_reachable(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
) -> Result<bool, ProviderError> {
    let response = client
        .get(format!("{base_url}/models"))
        .header("Authorization", format!("Bearer {api_key}"))
        .send()
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

    Ok(response.status().is_success())
}

/// Incremental decoder for `text/event-stream` completion bodies.
///
/// Bytes may split lines (and UTF-8 sequences) anywhere; only complete
/// lines are interpreted.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    /// Feed raw bytes, returning every chunk completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if self.decode_line(&raw, &mut out) {
                return out;
            }
        }

        out
    }

    /// Interpret whatever is left in the buffer as a final, unterminated line.
    /// Call once the byte stream has ended.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if self.finished || self.buffer.is_empty() {
            return out;
        }
        let raw = std::mem::take(&mut self.buffer);
        self.decode_line(&raw, &mut out);
        out
    }

    /// Decode one raw line into `out`. Returns true once `[DONE]` is seen.
    fn decode_line(&mut self, raw: &[u8], out: &mut Vec<StreamChunk>) -> bool {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\n', '\r']);

        // Skip empty lines and SSE comments
        if line.is_empty() || line.starts_with(':') {
            return false;
        }

        let Some(data) = line.strip_prefix("data:") else {
            return false;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.finished = true;
            out.push(StreamChunk::done());
            return true;
        }

        match serde_json::from_str::<StreamResponse>(data) {
            Ok(resp) => {
                let content = resp
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|c| !c.is_empty());
                let usage = resp.usage.map(|u| Usage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
                if content.is_some() || usage.is_some() {
                    out.push(StreamChunk {
                        content,
                        done: false,
                        usage,
                    });
                }
            }
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
            }
        }
        false
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: String,
    usage: Option<EmbeddingApiUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiUsage {
    prompt_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Serialize, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
