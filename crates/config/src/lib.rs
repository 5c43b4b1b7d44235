//! Configuration loading, validation, and management for ragline.
//!
//! Loads configuration from `~/.ragline/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use ragline_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.ragline/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Embedding endpoint
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Streaming completion endpoint
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Vector index selection and connection
    #[serde(default)]
    pub vector: VectorConfig,

    /// Retry policy shared by every pre-stream call
    #[serde(default)]
    pub retry: RetryConfig,

    /// Retrieval and prompt settings
    #[serde(default)]
    pub rag: RagConfig,

    /// Chat store and background writer
    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_embedding_model(),
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_completion_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_completion_model() -> String {
    "jabir-400b".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_tokens() -> u32 {
    2000
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_completion_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Which vector index implementation serves retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Qdrant,
    Pinecone,
    Memory,
}

impl VectorBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qdrant" => Some(Self::Qdrant),
            "pinecone" => Some(Self::Pinecone),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

impl std::fmt::Display for VectorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Qdrant => "qdrant",
            Self::Pinecone => "pinecone",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// No default: the deployment has to pick one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<VectorBackend>,

    /// Qdrant base URL or Pinecone index host
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Qdrant collection
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Pinecone namespace
    #[serde(default)]
    pub namespace: String,

    /// Records loaded into the `memory` backend at startup (JSON array)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<PathBuf>,

    /// Ceiling for a single query's top-k
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

fn default_collection() -> String {
    "documents".into()
}
fn default_max_top_k() -> usize {
    20
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: None,
            url: String::new(),
            api_key: None,
            collection: default_collection(),
            namespace: String::new(),
            seed_file: None,
            max_top_k: default_max_top_k(),
        }
    }
}

impl std::fmt::Debug for VectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorConfig")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("collection", &self.collection)
            .field("namespace", &self.namespace)
            .field("seed_file", &self.seed_file)
            .field("max_top_k", &self.max_top_k)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Linear backoff step; attempt `i` waits `i * backoff_ms`
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_attempt_timeout_secs() -> u64 {
    30
}
fn default_backoff_ms() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.attempt_timeout_secs),
            Duration::from_millis(self.backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Budget for the serialized context, in approximate tokens (chars / 4)
    #[serde(default = "default_context_max_tokens")]
    pub context_max_tokens: usize,

    #[serde(default = "default_true")]
    pub enable_sources: bool,

    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    #[serde(default = "default_response_language")]
    pub response_language: String,
}

fn default_top_k() -> usize {
    8
}
fn default_context_max_tokens() -> usize {
    4000
}
fn default_max_sources() -> usize {
    10
}
fn default_response_language() -> String {
    "English".into()
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_max_tokens: default_context_max_tokens(),
            enable_sources: true,
            max_sources: default_max_sources(),
            response_language: default_response_language(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_backend")]
    pub backend: PersistenceBackend,

    /// SQLite file; defaults to `~/.ragline/ragline.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Bounded queue in front of the background assistant-message writer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

fn default_persistence_backend() -> PersistenceBackend {
    PersistenceBackend::Sqlite
}
fn default_queue_capacity() -> usize {
    64
}
fn default_enqueue_timeout_ms() -> u64 {
    1000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_persistence_backend(),
            database_url: None,
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
        }
    }
}

impl PersistenceConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_url
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("ragline.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ragline/config.toml).
    ///
    /// Environment overrides:
    /// - `RAGLINE_EMBEDDING_API_KEY` / `RAGLINE_COMPLETION_API_KEY` (fall back to `OPENAI_API_KEY`)
    /// - `RAGLINE_VECTOR_BACKEND`, `RAGLINE_VECTOR_URL`, `RAGLINE_VECTOR_API_KEY`
    /// - `RAGLINE_DATABASE_URL`, `RAGLINE_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let shared_key = lookup("OPENAI_API_KEY");

        if let Some(key) = lookup("RAGLINE_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(key);
        } else if self.embedding.api_key.is_none() {
            self.embedding.api_key = shared_key.clone();
        }

        if let Some(key) = lookup("RAGLINE_COMPLETION_API_KEY") {
            self.completion.api_key = Some(key);
        } else if self.completion.api_key.is_none() {
            self.completion.api_key = shared_key;
        }

        if let Some(raw) = lookup("RAGLINE_VECTOR_BACKEND") {
            let backend = VectorBackend::parse(&raw).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "RAGLINE_VECTOR_BACKEND must be one of qdrant, pinecone, memory (got '{raw}')"
                ))
            })?;
            self.vector.backend = Some(backend);
        }
        if let Some(url) = lookup("RAGLINE_VECTOR_URL") {
            self.vector.url = url;
        }
        if let Some(key) = lookup("RAGLINE_VECTOR_API_KEY") {
            self.vector.api_key = Some(key);
        }
        if let Some(url) = lookup("RAGLINE_DATABASE_URL") {
            self.persistence.database_url = Some(url);
        }
        if let Some(level) = lookup("RAGLINE_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ragline")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ConfigError::ValidationError(
                "completion.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.completion.top_p) {
            return Err(ConfigError::ValidationError(
                "completion.top_p must be between 0.0 and 1.0".into(),
            ));
        }

        if self.vector.max_top_k == 0 {
            return Err(ConfigError::ValidationError(
                "vector.max_top_k must be > 0".into(),
            ));
        }

        if self.rag.top_k == 0 || self.rag.top_k > self.vector.max_top_k {
            return Err(ConfigError::ValidationError(format!(
                "rag.top_k must be between 1 and {}",
                self.vector.max_top_k
            )));
        }

        if self.rag.context_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "rag.context_max_tokens must be > 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be >= 1".into(),
            ));
        }

        if self.persistence.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "persistence.queue_capacity must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// The configured vector backend, or an error when none was chosen.
    pub fn require_vector_backend(&self) -> Result<VectorBackend, ConfigError> {
        self.vector.backend.ok_or_else(|| {
            ConfigError::ValidationError(
                "vector.backend is not set; choose one of qdrant, pinecone, memory".into(),
            )
        })
    }

    /// Check if both endpoints have an API key.
    pub fn has_api_keys(&self) -> bool {
        self.embedding.api_key.is_some() && self.completion.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for ragline_core::Error {
    fn from(e: ConfigError) -> Self {
        ragline_core::Error::Config {
            message: e.to_string(),
        }
    }
}
