// Knowledge base subsystem
// Every public operation of `KnowledgeBase` answers with an `Outcome`; errors
// stop here and are logged.

pub mod client;
pub mod import;
pub mod ingest;
pub mod lifecycle;
pub mod models;
pub mod rag;


use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub use client::VectorStoreClient;
pub use import::{ImportReport, PostDocument, PostImporter};
pub use ingest::{IngestReport, IngestionPipeline};
pub use lifecycle::{ClearReport, ClearStrategy, CollectionLifecycle, CollectionState};
pub use models::{DocumentInput, DocumentRecord, Metadata, MetadataValue, QueryResult};
pub use rag::{RagAnswer, RagService, SourceExcerpt};

use crate::config::{Config, EnvironmentDescriptor, EnvironmentResolver};
use crate::database::{BackendFactory, CollectionStats, DefaultBackendFactory};
use crate::embeddings::{ChunkingConfig, Embedder};
use crate::{KbError, Result};

/// Result envelope returned across the subsystem boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Outcome<T> {
    #[inline]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    #[inline]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    #[inline]
    pub fn disabled() -> Self {
        Self::failure(KbError::Disabled.to_string())
    }

    /// Log a failed operation and fold it into the envelope
    pub fn from_result(operation: &str, result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                warn!("Knowledge base {} failed: {}", operation, e);
                Self::failure(e.to_string())
            }
        }
    }

    /// Back to a `Result` for callers that want `?`
    pub fn into_result(self) -> anyhow::Result<T> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(anyhow::anyhow!(
                self.error.unwrap_or_else(|| "operation failed".to_string())
            )),
        }
    }
}

/// Facade over one environment's vector store plus the embedding stack.
///
/// The current client sits behind a lock; switching environments swaps in
/// a fresh client while operations already holding the old one finish
/// against their original target.
#[derive(Debug)]
pub struct KnowledgeBase {
    enabled: bool,
    resolver: EnvironmentResolver,
    factory: Arc<dyn BackendFactory>,
    embedder: Arc<Embedder>,
    chunking: ChunkingConfig,
    concurrency: usize,
    default_collection: String,
    top_k: usize,
    min_score: f32,
    client: RwLock<Arc<VectorStoreClient>>,
}

impl KnowledgeBase {
    /// Build from configuration with the scheme-based backend factory and
    /// the configured embedding provider
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let embedder = Embedder::from_config(&config.embedding)?;
        Ok(Self::with_parts(
            config,
            Arc::new(DefaultBackendFactory::new()),
            embedder,
        ))
    }

    pub fn with_parts(
        config: &Config,
        factory: Arc<dyn BackendFactory>,
        embedder: Embedder,
    ) -> Self {
        let resolver = EnvironmentResolver::new(config);
        let env = resolver.resolve(&config.default_environment);
        let client = Arc::new(VectorStoreClient::new(env, factory.clone()));

        Self {
            enabled: config.enabled,
            resolver,
            factory,
            embedder: Arc::new(embedder),
            chunking: config.chunking.clone(),
            concurrency: config.ingestion.concurrency,
            default_collection: config.ingestion.default_collection.clone(),
            top_k: config.retrieval.top_k,
            min_score: config.retrieval.min_score,
            client: RwLock::new(client),
        }
    }

    #[inline]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn default_collection(&self) -> &str {
        &self.default_collection
    }

    /// Configured environment names
    #[inline]
    pub fn environments(&self) -> Vec<String> {
        self.resolver.names()
    }

    pub async fn current_environment(&self) -> EnvironmentDescriptor {
        self.client.read().await.environment().clone()
    }

    async fn client(&self) -> Arc<VectorStoreClient> {
        self.client.read().await.clone()
    }

    async fn pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            self.client().await,
            self.embedder.clone(),
            self.chunking.clone(),
            self.concurrency,
        )
    }

    /// Point the facade at another environment. The new client connects on
    /// its first operation.
    pub async fn switch_environment(&self, name: &str) -> Outcome<EnvironmentDescriptor> {
        if !self.enabled {
            return Outcome::disabled();
        }

        let env = self.resolver.resolve(name);
        let client = Arc::new(VectorStoreClient::new(env.clone(), self.factory.clone()));
        *self.client.write().await = client;

        info!("Switched to environment '{}' at {}", env.name, env.endpoint);
        Outcome::ok(env)
    }

    pub async fn connect(&self) -> Outcome<bool> {
        if !self.enabled {
            return Outcome::disabled();
        }

        let client = self.client().await;
        if client.connect().await {
            Outcome::ok(true)
        } else {
            let env = client.environment();
            Outcome::failure(
                KbError::Connectivity(format!(
                    "Cannot reach environment '{}' at {}",
                    env.name, env.endpoint
                ))
                .to_string(),
            )
        }
    }

    /// Create a collection; the dimension defaults to the embedder's
    pub async fn create_collection(&self, name: &str, dimension: Option<usize>) -> Outcome<bool> {
        if !self.enabled {
            return Outcome::disabled();
        }
        let dimension = dimension.unwrap_or_else(|| self.embedder.dimension());
        let result = self.client().await.create_collection(name, dimension).await;
        Outcome::from_result("create_collection", result)
    }

    pub async fn list_collections(&self) -> Outcome<Vec<String>> {
        if !self.enabled {
            return Outcome::disabled();
        }
        let result = self.client().await.list_collections().await;
        Outcome::from_result("list_collections", result)
    }

    pub async fn collection_stats(&self, name: &str) -> Outcome<CollectionStats> {
        if !self.enabled {
            return Outcome::disabled();
        }
        let result = self.client().await.stats(name).await;
        Outcome::from_result("collection_stats", result)
    }

    pub async fn collection_state(&self, name: &str) -> Outcome<CollectionState> {
        if !self.enabled {
            return Outcome::disabled();
        }
        let result = CollectionLifecycle::new(self.client().await)
            .state(name)
            .await;
        Outcome::from_result("collection_state", result)
    }

    pub async fn drop_collection(&self, name: &str) -> Outcome<bool> {
        if !self.enabled {
            return Outcome::disabled();
        }
        let result = CollectionLifecycle::new(self.client().await)
            .drop(name)
            .await;
        Outcome::from_result("drop_collection", result)
    }

    pub async fn clear_collection(&self, name: &str) -> Outcome<ClearReport> {
        if !self.enabled {
            return Outcome::disabled();
        }
        let result = CollectionLifecycle::new(self.client().await)
            .clear(name)
            .await;
        Outcome::from_result("clear_collection", result)
    }

    pub async fn add_document(
        &self,
        collection: &str,
        document: &DocumentInput,
    ) -> Outcome<IngestReport> {
        if !self.enabled {
            return Outcome::disabled();
        }
        let result = self
            .pipeline()
            .await
            .ingest(
                collection,
                &document.text,
                &document.source,
                &document.metadata,
            )
            .await;
        Outcome::from_result("add_document", result)
    }

    pub async fn delete_documents(&self, collection: &str, ids: &[String]) -> Outcome<bool> {
        if !self.enabled {
            return Outcome::disabled();
        }
        if self.client().await.delete_by_id(collection, ids).await {
            Outcome::ok(true)
        } else {
            Outcome::failure(format!(
                "Failed to delete {} documents from '{}'",
                ids.len(),
                collection
            ))
        }
    }

    /// Similarity search over raw text; unset limits come from configuration
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        top_k: Option<usize>,
        min_score: Option<f32>,
    ) -> Outcome<Vec<QueryResult>> {
        if !self.enabled {
            return Outcome::disabled();
        }

        let result = async {
            let embedding = self.embedder.embed(query).await?;
            self.client()
                .await
                .search(
                    collection,
                    &embedding.vector,
                    top_k.unwrap_or(self.top_k),
                    min_score.unwrap_or(self.min_score),
                )
                .await
        }
        .await;
        Outcome::from_result("search", result)
    }

    pub async fn query(
        &self,
        collection: &str,
        question: &str,
        top_k: Option<usize>,
        min_score: Option<f32>,
    ) -> Outcome<RagAnswer> {
        if !self.enabled {
            return Outcome::disabled();
        }

        let result = RagService::new(self.client().await, self.embedder.clone())
            .query(
                collection,
                question,
                top_k.unwrap_or(self.top_k),
                min_score.unwrap_or(self.min_score),
            )
            .await;
        Outcome::from_result("query", result)
    }

    /// Import a `.json` or `.csv` file of posts
    pub async fn import_posts(
        &self,
        collection: &str,
        path: &Path,
        progress: &ProgressBar,
    ) -> Outcome<ImportReport> {
        if !self.enabled {
            return Outcome::disabled();
        }

        let importer = PostImporter::new(Arc::new(self.pipeline().await));
        let result = importer.import_file(collection, path, progress).await;
        Outcome::from_result("import_posts", result)
    }
}
