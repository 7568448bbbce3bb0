#[cfg(test)]
mod tests;

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::models::{DocumentRecord, QueryResult};
use crate::config::{EnvironmentDescriptor, validate_collection_name};
use crate::database::{
    BackendFactory, CollectionSchema, CollectionStats, IndexSpec, SearchRequest, VectorBackend,
    validate_id,
};
use crate::{KbError, Result};

/// Handle to the vector store of one environment.
///
/// The backend is opened on first use and lives as long as the handle.
/// Switching environments means building a new client; this one keeps its
/// target. Dropping a pending call stops waiting for it, but a request that
/// already reached the store may still complete there.
#[derive(Debug)]
pub struct VectorStoreClient {
    env: EnvironmentDescriptor,
    factory: Arc<dyn BackendFactory>,
    backend: OnceCell<Arc<dyn VectorBackend>>,
}

impl VectorStoreClient {
    #[inline]
    pub fn new(env: EnvironmentDescriptor, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            env,
            factory,
            backend: OnceCell::new(),
        }
    }

    #[inline]
    pub fn environment(&self) -> &EnvironmentDescriptor {
        &self.env
    }

    async fn backend(&self) -> Result<&Arc<dyn VectorBackend>> {
        self.backend
            .get_or_try_init(|| async {
                let backend = self.factory.open(&self.env).await?;
                info!(
                    "Opened {} backend for environment '{}'",
                    backend.kind(),
                    self.env.name
                );
                Ok(backend)
            })
            .await
    }

    /// Open the backend if needed and check it answers
    pub async fn connect(&self) -> bool {
        let result = match self.backend().await {
            Ok(backend) => backend.health_check().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to connect to environment '{}' at {}: {}",
                    self.env.name, self.env.endpoint, e
                );
                false
            }
        }
    }

    /// Create the collection with its index and load it. Existing
    /// collections are left untouched.
    pub async fn create_collection(&self, name: &str, dimension: usize) -> Result<bool> {
        validate_collection_name(name).map_err(|e| KbError::Config(e.to_string()))?;
        let backend = self.backend().await?;

        if backend.has_collection(name).await? {
            debug!("Collection '{}' already exists", name);
            return Ok(true);
        }

        backend
            .create_collection(&CollectionSchema::new(name, dimension))
            .await?;
        backend.build_index(name, &IndexSpec::default()).await?;
        backend.load_collection(name).await?;

        info!("Created collection '{}' ({} dimensions)", name, dimension);
        Ok(true)
    }

    /// Validate, write and flush. A failure leaves no partial retry behind.
    pub async fn insert(&self, name: &str, records: &[DocumentRecord]) -> Result<bool> {
        if records.is_empty() {
            return Ok(true);
        }

        let backend = self.backend().await?;
        let schema = backend.describe_collection(name).await?;

        let rows = records
            .iter()
            .map(|record| record.to_stored_row(schema.dimension))
            .collect::<Result<Vec<_>>>()?;

        backend.insert(name, rows).await?;
        backend.flush(&[name]).await?;

        debug!("Inserted {} records into '{}'", records.len(), name);
        Ok(true)
    }

    /// Nearest neighbours by inner product, keeping hits with
    /// `score >= min_score`; may return fewer than `top_k`
    pub async fn search(
        &self,
        name: &str,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<QueryResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let backend = self.backend().await?;
        let hits = backend
            .search(name, &SearchRequest::new(query.to_vec(), top_k))
            .await?;

        let retrieved = hits.len();
        let results: Vec<QueryResult> = hits
            .into_iter()
            .filter(|hit| hit.score >= min_score)
            .map(QueryResult::from)
            .collect();

        debug!(
            "Search on '{}' kept {} of {} hits (min_score {})",
            name,
            results.len(),
            retrieved,
            min_score
        );
        Ok(results)
    }

    pub async fn delete_by_id(&self, name: &str, ids: &[String]) -> bool {
        if ids.is_empty() {
            return true;
        }
        if let Err(e) = ids.iter().try_for_each(|id| validate_id(id)) {
            warn!("Refusing to delete from '{}': {}", name, e);
            return false;
        }

        let result = async {
            let backend = self.backend().await?;
            backend.delete_ids(name, ids).await?;
            backend.flush(&[name]).await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Delete of {} ids on '{}' failed: {}", ids.len(), name, e);
                false
            }
        }
    }

    pub async fn delete_by_filter(&self, name: &str, expression: &str) -> bool {
        let result = async {
            let backend = self.backend().await?;
            backend.delete(name, expression).await?;
            backend.flush(&[name]).await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Delete '{}' on '{}' failed: {}", expression, name, e);
                false
            }
        }
    }

    /// Returns false when there was nothing to drop
    pub async fn drop_collection(&self, name: &str) -> Result<bool> {
        let backend = self.backend().await?;
        if !backend.has_collection(name).await? {
            return Ok(false);
        }
        backend.drop_collection(name).await?;
        Ok(true)
    }

    pub async fn has_collection(&self, name: &str) -> Result<bool> {
        self.backend().await?.has_collection(name).await
    }

    pub async fn list_collections(&self) -> Result<Vec<String>> {
        self.backend().await?.list_collections().await
    }

    pub async fn stats(&self, name: &str) -> Result<CollectionStats> {
        self.backend().await?.collection_stats(name).await
    }

    pub async fn describe(&self, name: &str) -> Result<CollectionSchema> {
        self.backend().await?.describe_collection(name).await
    }
}
