//! `ragline config`: configuration management commands.

use std::path::Path;

use ragline_config::{AppConfig, ConfigError};

const REDACTED: &str = "********";

pub async fn validate(
    path: &Path,
    loaded: Result<AppConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating {}...", path.display());

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Embedding:   {} @ {}", config.embedding.model, config.embedding.base_url);
    println!("   Completion:  {} @ {}", config.completion.model, config.completion.base_url);
    println!(
        "   Vector:      {}",
        config
            .vector
            .backend
            .map(|b| b.to_string())
            .unwrap_or_else(|| "not set".into())
    );
    println!("   top_k:       {}", config.rag.top_k);
    println!("   Context:     {} tokens", config.rag.context_max_tokens);
    println!("   Language:    {}", config.rag.response_language);

    Ok(())
}

/// Problems that do not stop the config from loading but will fail a run.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if config.embedding.api_key.is_none() {
        warnings.push("No embedding API key (set RAGLINE_EMBEDDING_API_KEY or OPENAI_API_KEY)");
    }
    if config.completion.api_key.is_none() {
        warnings.push("No completion API key (set RAGLINE_COMPLETION_API_KEY or OPENAI_API_KEY)");
    }
    if config.require_vector_backend().is_err() {
        warnings.push("vector.backend is not set; `ask` and `bench` will refuse to run");
    }
    if !config.rag.enable_sources {
        warnings.push("Source references are disabled (rag.enable_sources = false)");
    }
    warnings
}

pub async fn show(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&redacted(config))?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", path.display());
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    for key in [
        &mut config.embedding.api_key,
        &mut config.completion.api_key,
        &mut config.vector.api_key,
    ] {
        if key.is_some() {
            *key = Some(REDACTED.into());
        }
    }
    config
}
