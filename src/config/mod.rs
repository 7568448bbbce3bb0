// Configuration management module
// TOML settings plus the deployment environment resolver

pub mod environment;
pub mod settings;


use anyhow::{Context, Result};
use console::style;

pub use environment::{EnvironmentDescriptor, EnvironmentResolver};
pub use settings::{
    Config, ConfigError, EmbeddingApi, EmbeddingConfig, EnvironmentConfig, IngestionConfig,
    RetrievalConfig, validate_collection_name,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Print the effective configuration, masking secrets
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("Knowledge base configuration").bold().cyan());
    eprintln!(
        "  Config file: {}",
        style(config.config_file_path().display()).cyan()
    );
    eprintln!("  Enabled: {}", config.enabled);
    eprintln!("  Default environment: {}", config.default_environment);
    eprintln!();

    eprintln!("{}", style("Environments").bold().yellow());
    for (name, env) in &config.environments {
        eprintln!(
            "  {}: {} (database: {}, credential: {})",
            style(name).bold(),
            env.endpoint,
            env.database.as_deref().unwrap_or("default"),
            if env.token.is_some() { "set" } else { "none" }
        );
    }
    eprintln!();

    eprintln!("{}", style("Embedding provider").bold().yellow());
    eprintln!("  API: {:?}", config.embedding.api);
    eprintln!("  Base URL: {}", config.embedding.base_url);
    eprintln!("  Model: {}", config.embedding.model);
    eprintln!("  Dimension: {}", config.embedding.dimension);
    eprintln!(
        "  API key: {}",
        if config.embedding.api_key.is_some() {
            "set"
        } else {
            "none (fallback vectors only)"
        }
    );
    eprintln!();

    eprintln!("{}", style("Pipeline").bold().yellow());
    eprintln!(
        "  Chunk size: {} chars, overlap: {}",
        config.chunking.chunk_size, config.chunking.overlap
    );
    eprintln!("  Concurrency: {}", config.ingestion.concurrency);
    eprintln!(
        "  Default collection: {}",
        config.ingestion.default_collection
    );
    eprintln!(
        "  Retrieval: top_k={}, min_score={}",
        config.retrieval.top_k, config.retrieval.min_score
    );

    config
        .validate()
        .context("Configuration loaded but failed validation")?;
    Ok(())
}
