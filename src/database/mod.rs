// Vector store backends
// The core talks to every store through `VectorBackend`; rows here are
// already flattened to the store's column layout.

pub mod lance;
pub mod memory;
pub mod milvus;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::EnvironmentDescriptor;
use crate::{KbError, Result};

pub use lance::LanceBackend;
pub use memory::MemoryBackend;
pub use milvus::MilvusBackend;

pub const ID_FIELD: &str = "id";
pub const VECTOR_FIELD: &str = "vector";
pub const TEXT_FIELD: &str = "text";
pub const SOURCE_FIELD: &str = "source";
pub const METADATA_FIELD: &str = "metadata";
pub const CREATED_AT_FIELD: &str = "created_at";

pub const MAX_ID_LENGTH: usize = 256;
pub const MAX_TEXT_LENGTH: usize = 65_535;
pub const MAX_SOURCE_LENGTH: usize = 512;
pub const MAX_METADATA_LENGTH: usize = 8_192;

/// Fixed layout of a knowledge base collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub dimension: usize,
}

impl CollectionSchema {
    #[inline]
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Inverted file over exact vectors
    IvfFlat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Inner product; higher scores are more similar
    InnerProduct,
}

/// Similarity index definition for the vector column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    pub kind: IndexKind,
    pub metric: Metric,
    pub nlist: u32,
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self {
            field: VECTOR_FIELD.to_string(),
            kind: IndexKind::IvfFlat,
            metric: Metric::InnerProduct,
            nlist: 128,
        }
    }
}

/// One row as stored; metadata is a serialized JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub source: String,
    pub metadata: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub metric: Metric,
    pub nprobe: u32,
}

impl SearchRequest {
    #[inline]
    pub fn new(vector: Vec<f32>, limit: usize) -> Self {
        Self {
            vector,
            limit,
            metric: Metric::InnerProduct,
            nprobe: 10,
        }
    }
}

/// A raw match returned by the store, best first
#[derive(Debug, Clone, PartialEq)]
pub struct StoredHit {
    pub row: StoredRow,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CollectionStats {
    pub row_count: u64,
    /// Bytes on disk when the store reports it
    pub data_size: Option<u64>,
}

/// Primitive operations of an external vector store.
///
/// Every call may fail; callers decide whether a failure is fatal.
#[async_trait]
pub trait VectorBackend: Send + Sync + std::fmt::Debug {
    /// Short name of the implementation, used in logs
    fn kind(&self) -> &'static str;

    async fn health_check(&self) -> Result<()>;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

    async fn build_index(&self, collection: &str, spec: &IndexSpec) -> Result<()>;

    async fn load_collection(&self, collection: &str) -> Result<()>;

    async fn insert(&self, collection: &str, rows: Vec<StoredRow>) -> Result<()>;

    async fn flush(&self, collections: &[&str]) -> Result<()>;

    async fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<StoredHit>>;

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats>;

    async fn describe_collection(&self, collection: &str) -> Result<CollectionSchema>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Delete rows matching a boolean filter expression
    async fn delete(&self, collection: &str, expression: &str) -> Result<()>;

    /// Delete rows by primary key
    async fn delete_ids(&self, collection: &str, ids: &[String]) -> Result<()> {
        let expression = id_filter(ids, ListSyntax::Parenthesized)?;
        self.delete(collection, &expression).await
    }
}

/// Opens a backend for a resolved environment
#[async_trait]
pub trait BackendFactory: Send + Sync + std::fmt::Debug {
    async fn open(&self, env: &EnvironmentDescriptor) -> Result<Arc<dyn VectorBackend>>;
}

/// Chooses the backend from the endpoint scheme: `http(s)://` is Milvus,
/// `memory://` is in-process, anything else is a LanceDB URI
#[derive(Debug, Default)]
pub struct DefaultBackendFactory {
    memory_stores: Mutex<HashMap<String, Arc<MemoryBackend>>>,
}

impl DefaultBackendFactory {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackendFactory for DefaultBackendFactory {
    async fn open(&self, env: &EnvironmentDescriptor) -> Result<Arc<dyn VectorBackend>> {
        debug!(
            "Opening vector backend for environment '{}' at {}",
            env.name, env.endpoint
        );

        if env.endpoint.starts_with("memory://") {
            // Same endpoint, same data, for the life of the factory
            let key = format!("{}#{}", env.endpoint, env.database);
            let mut stores = self.memory_stores.lock().await;
            let store = stores
                .entry(key)
                .or_insert_with(|| Arc::new(MemoryBackend::new()))
                .clone();
            return Ok(store);
        }

        if env.endpoint.starts_with("http://") || env.endpoint.starts_with("https://") {
            return Ok(Arc::new(MilvusBackend::new(env)?));
        }

        Ok(Arc::new(LanceBackend::connect(env).await?))
    }
}

/// Ids are embedded in filter expressions, so quoting characters are rejected
#[inline]
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return Err(KbError::Schema(format!(
            "Document id must be 1..={MAX_ID_LENGTH} bytes, got {}",
            id.len()
        )));
    }
    if id.contains(['\'', '"', '\\']) {
        return Err(KbError::Schema(format!(
            "Document id {id:?} contains quote or backslash characters"
        )));
    }
    Ok(())
}

/// How a filter expression spells a list of literals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSyntax {
    /// SQL style `id IN ('a', 'b')`
    Parenthesized,
    /// Milvus style `id in ['a', 'b']`
    Bracketed,
}

/// Expression selecting the given ids
#[inline]
pub fn id_filter(ids: &[String], syntax: ListSyntax) -> Result<String> {
    let mut quoted = Vec::with_capacity(ids.len());
    for id in ids {
        validate_id(id)?;
        quoted.push(format!("'{id}'"));
    }
    let list = quoted.join(", ");
    Ok(match syntax {
        ListSyntax::Parenthesized => format!("{ID_FIELD} IN ({list})"),
        ListSyntax::Bracketed => format!("{ID_FIELD} in [{list}]"),
    })
}

/// Expression matching every row; ids are never empty
pub const MATCH_ALL_EXPRESSION: &str = "id != ''";
