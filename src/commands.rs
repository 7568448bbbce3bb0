use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{Config, EnvironmentResolver, get_config_dir};
use crate::knowledge::{DocumentInput, KnowledgeBase};

/// Load configuration from `config_dir`, or the default directory
#[inline]
pub fn load_config(config_dir: Option<&Path>) -> Result<Config> {
    let dir = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => get_config_dir()?,
    };
    Config::load(&dir)
}

/// Write the effective configuration to disk, creating defaults if needed
#[inline]
pub fn save_config(config: &Config) -> Result<PathBuf> {
    config.save()?;
    Ok(config.config_file_path())
}

/// Build the knowledge base, switching environment when one is named
pub async fn open_knowledge_base(
    config: &Config,
    environment: Option<&str>,
) -> Result<KnowledgeBase> {
    let kb = KnowledgeBase::new(config).context("Failed to initialize knowledge base")?;
    if let Some(name) = environment {
        kb.switch_environment(name).await.into_result()?;
    }
    Ok(kb)
}

#[inline]
pub fn list_environments(config: &Config) {
    let resolver = EnvironmentResolver::new(config);
    println!("Environments:");
    for name in resolver.names() {
        let env = resolver.resolve(&name);
        let marker = if name == resolver.default_name() {
            style("*").green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {} -> {} (database: {})",
            marker,
            style(&env.name).bold(),
            env.endpoint,
            env.database
        );
    }
}

pub async fn show_status(kb: &KnowledgeBase) -> Result<()> {
    let env = kb.current_environment().await;
    println!("Environment: {} ({})", style(&env.name).bold(), env.endpoint);

    if !kb.is_enabled() {
        println!("Status: {}", style("disabled").yellow());
        return Ok(());
    }

    let connected = kb.connect().await;
    if connected.success {
        println!("Status: {}", style("connected").green());
    } else {
        println!(
            "Status: {} - {}",
            style("unreachable").red(),
            connected.error.unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn list_collections(kb: &KnowledgeBase) -> Result<()> {
    let collections = kb.list_collections().await.into_result()?;
    if collections.is_empty() {
        println!("No collections found.");
        return Ok(());
    }

    println!("Collections:");
    for name in collections {
        match kb.collection_stats(&name).await.into_result() {
            Ok(stats) => println!("  {} ({} rows)", style(&name).bold(), stats.row_count),
            Err(_) => println!("  {}", style(&name).bold()),
        }
    }
    Ok(())
}

pub async fn create_collection(
    kb: &KnowledgeBase,
    name: &str,
    dimension: Option<usize>,
) -> Result<()> {
    kb.create_collection(name, dimension).await.into_result()?;
    println!("Collection '{}' is ready", name);
    Ok(())
}

pub async fn drop_collection(kb: &KnowledgeBase, name: &str) -> Result<()> {
    if kb.drop_collection(name).await.into_result()? {
        println!("Dropped collection '{}'", name);
    } else {
        println!("Collection '{}' does not exist", name);
    }
    Ok(())
}

pub async fn clear_collection(kb: &KnowledgeBase, name: &str) -> Result<()> {
    let report = kb.clear_collection(name).await.into_result()?;
    println!(
        "Cleared {} rows from '{}' using {:?}",
        report.rows_before, report.collection, report.strategy
    );
    Ok(())
}

pub async fn show_stats(kb: &KnowledgeBase, name: &str) -> Result<()> {
    let stats = kb.collection_stats(name).await.into_result()?;
    let state = kb.collection_state(name).await.into_result()?;
    println!("Collection: {}", style(name).bold());
    println!("  State: {:?}", state);
    println!("  Rows: {}", stats.row_count);
    if let Some(size) = stats.data_size {
        println!("  Data size: {} bytes", size);
    }
    Ok(())
}

/// Ingest a text file; the source defaults to the file name
pub async fn ingest_file(
    kb: &KnowledgeBase,
    collection: &str,
    path: &Path,
    source: Option<String>,
) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let source = source.unwrap_or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    });

    info!("Ingesting {} into '{}'", path.display(), collection);
    let report = kb
        .add_document(collection, &DocumentInput::new(text, source))
        .await
        .into_result()?;

    println!(
        "Ingested {} chunks from '{}' into '{}'",
        report.chunks, report.source, report.collection
    );
    if report.degraded > 0 {
        println!(
            "{}",
            style(format!(
                "{} chunks used fallback embeddings",
                report.degraded
            ))
            .yellow()
        );
    }
    Ok(())
}

pub async fn import_posts(kb: &KnowledgeBase, collection: &str, path: &Path) -> Result<()> {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new(0).with_style(
            ProgressStyle::with_template("{bar:40} [{pos}/{len}] Importing posts")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };

    let report = kb.import_posts(collection, path, &bar).await.into_result()?;
    bar.finish_and_clear();

    println!("Import into '{}' finished", collection);
    println!("  Total rows: {}", report.total);
    println!("  Imported: {}", report.imported);
    println!("  Skipped: {}", report.skipped);
    println!("  Failed: {}", report.failed);
    for error in &report.errors {
        println!("    {}", style(error).red());
    }
    Ok(())
}

pub async fn query(
    kb: &KnowledgeBase,
    collection: &str,
    question: &str,
    top_k: Option<usize>,
    min_score: Option<f32>,
    json: bool,
) -> Result<()> {
    let answer = kb
        .query(collection, question, top_k, min_score)
        .await
        .into_result()?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&answer).context("Failed to serialize answer")?
        );
        return Ok(());
    }

    if answer.sources.is_empty() {
        println!("No matching context found.");
        return Ok(());
    }

    for (rank, source) in answer.sources.iter().enumerate() {
        println!(
            "{}. {} (score {:.3})",
            rank + 1,
            style(&source.source).bold(),
            source.score
        );
        println!("   {}", source.text.replace('\n', "\n   "));
    }
    Ok(())
}
