use anyhow::Result;
use clap::{Parser, Subcommand};
use kb_core::commands::{
    clear_collection, create_collection, drop_collection, import_posts, ingest_file,
    list_collections, list_environments, load_config, open_knowledge_base, query, save_config,
    show_stats, show_status,
};
use kb_core::config::show_config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kbctl")]
#[command(about = "Manage vector knowledge base collections and run RAG queries")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (defaults to ~/.kb-core)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Environment to operate on instead of the configured default
    #[arg(long = "env", global = true)]
    environment: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or write the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// List configured environments
    Environments,
    /// Check connectivity of the selected environment
    Status,
    /// Manage collections
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Chunk, embed and store a text file
    Ingest {
        file: PathBuf,
        #[arg(long)]
        collection: Option<String>,
        /// Source label stored with each chunk (defaults to the file name)
        #[arg(long)]
        source: Option<String>,
    },
    /// Import social posts from a .json or .csv file
    Import {
        file: PathBuf,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Retrieve context for a question
    Query {
        question: String,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        min_score: Option<f32>,
        /// Print the answer as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    List,
    Create {
        name: String,
        /// Vector dimension (defaults to the embedding dimension)
        #[arg(long)]
        dimension: Option<usize>,
    },
    Drop {
        name: String,
    },
    /// Remove every row but keep the collection
    Clear {
        name: String,
    },
    Stats {
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config_dir.as_deref())?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                let path = save_config(&config)?;
                println!("Configuration written to {}", path.display());
            }
        }
        Commands::Environments => {
            list_environments(&config);
        }
        command => {
            let kb = open_knowledge_base(&config, cli.environment.as_deref()).await?;
            let default_collection = kb.default_collection().to_string();

            match command {
                Commands::Status => show_status(&kb).await?,
                Commands::Collections { action } => match action {
                    CollectionAction::List => list_collections(&kb).await?,
                    CollectionAction::Create { name, dimension } => {
                        create_collection(&kb, &name, dimension).await?;
                    }
                    CollectionAction::Drop { name } => drop_collection(&kb, &name).await?,
                    CollectionAction::Clear { name } => clear_collection(&kb, &name).await?,
                    CollectionAction::Stats { name } => show_stats(&kb, &name).await?,
                },
                Commands::Ingest {
                    file,
                    collection,
                    source,
                } => {
                    let collection = collection.unwrap_or(default_collection);
                    ingest_file(&kb, &collection, &file, source).await?;
                }
                Commands::Import { file, collection } => {
                    let collection = collection.unwrap_or(default_collection);
                    import_posts(&kb, &collection, &file).await?;
                }
                Commands::Query {
                    question,
                    collection,
                    top_k,
                    min_score,
                    json,
                } => {
                    let collection = collection.unwrap_or(default_collection);
                    query(&kb, &collection, &question, top_k, min_score, json).await?;
                }
                Commands::Config { .. } | Commands::Environments => {}
            }
        }
    }

    Ok(())
}
