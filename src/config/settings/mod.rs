
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;
pub const DEFAULT_ENVIRONMENT: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Global switch for the whole knowledge base subsystem
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_environment_name")]
    pub default_environment: String,
    #[serde(default = "default_environments")]
    pub environments: BTreeMap<String, EnvironmentConfig>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Connection parameters for one deployment environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// `http(s)://` for a Milvus server, `memory://` for an in-process store,
    /// anything else is a LanceDB URI or path (relative paths resolve against
    /// the config directory)
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Backend specific options, e.g. object store credentials for LanceDB
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl EnvironmentConfig {
    #[inline]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            database: None,
            options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingApi {
    /// OpenAI compatible `/v1/embeddings`
    #[default]
    OpenAi,
    /// Ollama `/api/embed`
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api: EmbeddingApi,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub dimension: u32,
    pub max_input_chars: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    /// Use deterministic fallback vectors when the provider fails
    pub fallback_on_error: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api: EmbeddingApi::OpenAi,
            base_url: "https://api.openai.com".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            max_input_chars: 8000,
            timeout_seconds: 30,
            retry_attempts: 3,
            fallback_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestionConfig {
    /// Number of chunks embedded concurrently per batch
    pub concurrency: usize,
    pub default_collection: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            default_collection: "knowledge_base".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.5,
        }
    }
}

const fn default_enabled() -> bool {
    true
}

fn default_environment_name() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}

fn default_environments() -> BTreeMap<String, EnvironmentConfig> {
    BTreeMap::from([(
        DEFAULT_ENVIRONMENT.to_string(),
        EnvironmentConfig::new("vectors"),
    )])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            default_environment: default_environment_name(),
            environments: default_environments(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            ingestion: IngestionConfig::default(),
            retrieval: RetrievalConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid max input length: {0} (must be between 1 and 1000000 characters)")]
    InvalidMaxInputChars(usize),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid chunk size: {0} (must be between 50 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid concurrency: {0} (must be between 1 and 64)")]
    InvalidConcurrency(usize),
    #[error("Invalid top_k: {0} (must be between 1 and 1000)")]
    InvalidTopK(usize),
    #[error("Invalid min_score: {0} (must be a finite number)")]
    InvalidMinScore(f32),
    #[error("Invalid collection name: {0:?} (letters, digits and underscores, not starting with a digit)")]
    InvalidCollectionName(String),
    #[error("No environments configured")]
    NoEnvironments,
    #[error("Default environment '{0}' is not configured")]
    UnknownDefaultEnvironment(String),
    #[error("Environment '{0}' has an empty endpoint")]
    EmptyEndpoint(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load `config.toml` from `config_dir`, falling back to defaults when absent
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Default configuration directory (`~/.kb-core`)
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".kb-core"))
            .or_else(|| dirs::data_dir().map(|data| data.join("kb-core")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_environments()?;
        self.embedding.validate()?;
        self.validate_chunking_config()?;
        self.validate_pipeline_config()?;
        Ok(())
    }

    fn validate_environments(&self) -> Result<(), ConfigError> {
        if self.environments.is_empty() {
            return Err(ConfigError::NoEnvironments);
        }

        if !self.environments.contains_key(&self.default_environment) {
            return Err(ConfigError::UnknownDefaultEnvironment(
                self.default_environment.clone(),
            ));
        }

        for (name, env) in &self.environments {
            if env.endpoint.trim().is_empty() {
                return Err(ConfigError::EmptyEndpoint(name.clone()));
            }
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(50..=8192).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_pipeline_config(&self) -> Result<(), ConfigError> {
        if !(1..=64).contains(&self.ingestion.concurrency) {
            return Err(ConfigError::InvalidConcurrency(self.ingestion.concurrency));
        }

        validate_collection_name(&self.ingestion.default_collection)?;

        if !(1..=1000).contains(&self.retrieval.top_k) {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }

        if !self.retrieval.min_score.is_finite() {
            return Err(ConfigError::InvalidMinScore(self.retrieval.min_score));
        }

        Ok(())
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(1..=8192).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        if !(1..=1_000_000).contains(&self.max_input_chars) {
            return Err(ConfigError::InvalidMaxInputChars(self.max_input_chars));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        Ok(url)
    }

    /// Whether a real provider call can be attempted at all
    #[inline]
    pub fn has_credentials(&self) -> bool {
        match self.api {
            EmbeddingApi::OpenAi => self
                .api_key
                .as_deref()
                .is_some_and(|key| !key.trim().is_empty()),
            // Ollama runs without authentication
            EmbeddingApi::Ollama => true,
        }
    }
}

/// Letters, digits and underscores, not starting with a digit, at most 255 bytes
pub fn validate_collection_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && name.len() <= 255
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidCollectionName(name.to_string()))
    }
}
