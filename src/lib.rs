use thiserror::Error;

pub type Result<T> = std::result::Result<T, KbError>;

#[derive(Error, Debug)]
pub enum KbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    Store(String),

    #[error("Collection '{collection}' still holds {remaining} rows after filter delete and drop-recreate")]
    ClearExhausted { collection: String, remaining: u64 },

    #[error("Import error: {0}")]
    Import(String),

    #[error("Knowledge base is disabled in the configuration")]
    Disabled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod http;
pub mod knowledge;
