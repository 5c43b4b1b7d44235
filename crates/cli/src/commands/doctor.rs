//! `ragline doctor`: diagnose configuration and provider health.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use ragline_config::{AppConfig, ConfigError, PersistenceBackend};
use ragline_core::error::ProviderError;
use ragline_providers::{build_completion_provider, build_embedding_provider, build_vector_store};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(
    path: &Path,
    loaded: Result<AppConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 ragline doctor");
    println!("=================\n");

    let mut issues = 0;

    if path.exists() {
        println!("  ✅ Config file found: {}", path.display());
    } else {
        println!("  ⚠️  No config file at {}, using defaults (run `ragline init`)", path.display());
        issues += 1;
    }

    let config = match loaded {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before running further checks.");
            return Ok(());
        }
    };

    match build_embedding_provider(&config.embedding) {
        Ok(provider) => {
            issues += check("Embedding endpoint", provider.health_check()).await;
        }
        Err(e) => {
            println!("  ❌ Embedding provider: {e}");
            issues += 1;
        }
    }

    match build_completion_provider(&config.completion) {
        Ok(provider) => {
            issues += check("Completion endpoint", provider.health_check()).await;
        }
        Err(e) => {
            println!("  ❌ Completion provider: {e}");
            issues += 1;
        }
    }

    match build_vector_store(&config.vector) {
        Ok(store) => {
            let label = format!("Vector index ({})", store.name());
            issues += check(&label, store.health_check()).await;
        }
        Err(e) => {
            println!("  ❌ Vector store: {e}");
            issues += 1;
        }
    }

    match config.persistence.backend {
        PersistenceBackend::Sqlite => match super::open_store(&config).await {
            Ok(_) => println!(
                "  ✅ Chat database: {}",
                config.persistence.database_path().display()
            ),
            Err(e) => {
                println!("  ❌ Chat database: {e}");
                issues += 1;
            }
        },
        PersistenceBackend::Memory => {
            println!("  ⚠️  Chats are kept in memory and lost on exit");
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

/// Print one health line; returns the number of issues found (0 or 1).
async fn check<F>(label: &str, probe: F) -> usize
where
    F: Future<Output = Result<bool, ProviderError>>,
{
    match tokio::time::timeout(HEALTH_TIMEOUT, probe).await {
        Ok(Ok(true)) => {
            println!("  ✅ {label} reachable");
            0
        }
        Ok(Ok(false)) => {
            println!("  ❌ {label} responded but reported unhealthy");
            1
        }
        Ok(Err(e)) => {
            println!("  ❌ {label}: {e}");
            1
        }
        Err(_) => {
            println!("  ❌ {label}: no response within {}s", HEALTH_TIMEOUT.as_secs());
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_counts_failures() {
        assert_eq!(check("ok", async { Ok(true) }).await, 0);
        assert_eq!(check("down", async { Ok(false) }).await, 1);
        assert_eq!(
            check("err", async { Err(ProviderError::Network("refused".into())) }).await,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn check_times_out() {
        let hung = std::future::pending::<Result<bool, ProviderError>>();
        assert_eq!(check("slow", hung).await, 1);
    }
}
