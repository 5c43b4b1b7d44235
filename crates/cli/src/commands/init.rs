//! `ragline init`: write a default configuration file.

use std::path::Path;

use ragline_config::AppConfig;

const HEADER: &str = "\
# ragline configuration
#
# API keys are read from the environment when absent here:
#   RAGLINE_EMBEDDING_API_KEY, RAGLINE_COMPLETION_API_KEY, OPENAI_API_KEY
#
# A vector backend must be chosen before `ragline ask` will run:
#   [vector]
#   backend = \"qdrant\"   # or \"pinecone\", \"memory\"

";

/// Default file contents: commented header plus every default value.
pub fn render() -> String {
    format!("{HEADER}{}", AppConfig::default_toml())
}

pub async fn run(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("ragline setup");
    println!("=============\n");

    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created config directory: {}", dir.display());
        }
    }

    if path.exists() && !force {
        println!("  Config already exists: {}", path.display());
        println!("  Use --force to overwrite it.");
        return Ok(());
    }

    std::fs::write(path, render())?;
    println!("✅ Wrote {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set vector.backend in the config");
    println!("  2. Export OPENAI_API_KEY (or the per-endpoint keys)");
    println!("  3. Run `ragline doctor`");

    Ok(())
}
