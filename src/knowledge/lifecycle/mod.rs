
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::VectorStoreClient;
use crate::database::MATCH_ALL_EXPRESSION;
use crate::{KbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionState {
    Absent,
    Empty,
    Populated,
}

/// How a clear reached zero rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearStrategy {
    FilterDelete,
    DropRecreate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub collection: String,
    pub strategy: ClearStrategy,
    pub rows_before: u64,
    pub dimension: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClearStep {
    FilterDelete,
    VerifyFilter,
    DropRecreate,
    VerifyRecreate,
    Done(ClearStrategy),
    Failed { remaining: u64 },
}

/// Creates, clears and drops collections on one client
#[derive(Debug, Clone)]
pub struct CollectionLifecycle {
    client: Arc<VectorStoreClient>,
}

impl CollectionLifecycle {
    #[inline]
    pub fn new(client: Arc<VectorStoreClient>) -> Self {
        Self { client }
    }

    pub async fn state(&self, name: &str) -> Result<CollectionState> {
        if !self.client.has_collection(name).await? {
            return Ok(CollectionState::Absent);
        }
        let stats = self.client.stats(name).await?;
        Ok(if stats.row_count == 0 {
            CollectionState::Empty
        } else {
            CollectionState::Populated
        })
    }

    /// Absent becomes Empty; any other state is left alone
    pub async fn ensure_exists(&self, name: &str, dimension: usize) -> Result<()> {
        self.client.create_collection(name, dimension).await.map(|_| ())
    }

    /// Remove every row but keep the collection's schema and index.
    ///
    /// Tries a match-all filter delete first. When rows survive it, the
    /// collection is dropped and recreated with its original dimension.
    pub async fn clear(&self, name: &str) -> Result<ClearReport> {
        let dimension = self.client.describe(name).await?.dimension;
        let rows_before = self.client.stats(name).await?.row_count;
        info!("Clearing collection '{}' ({} rows)", name, rows_before);

        let mut step = ClearStep::FilterDelete;
        loop {
            debug!("Clear '{}': {:?}", name, step);
            step = match step {
                ClearStep::FilterDelete => {
                    if !self
                        .client
                        .delete_by_filter(name, MATCH_ALL_EXPRESSION)
                        .await
                    {
                        warn!("Filter delete on '{}' was not accepted", name);
                    }
                    ClearStep::VerifyFilter
                }
                ClearStep::VerifyFilter => match self.client.stats(name).await {
                    Ok(stats) if stats.row_count == 0 => {
                        ClearStep::Done(ClearStrategy::FilterDelete)
                    }
                    Ok(stats) => {
                        warn!(
                            "{} rows remain in '{}' after filter delete, falling back to drop and recreate",
                            stats.row_count, name
                        );
                        ClearStep::DropRecreate
                    }
                    Err(e) => {
                        warn!("Could not verify filter delete on '{}': {}", name, e);
                        ClearStep::DropRecreate
                    }
                },
                ClearStep::DropRecreate => {
                    self.client.drop_collection(name).await?;
                    self.client.create_collection(name, dimension).await?;
                    ClearStep::VerifyRecreate
                }
                ClearStep::VerifyRecreate => {
                    let remaining = self.client.stats(name).await?.row_count;
                    if remaining == 0 {
                        ClearStep::Done(ClearStrategy::DropRecreate)
                    } else {
                        ClearStep::Failed { remaining }
                    }
                }
                ClearStep::Done(strategy) => {
                    info!("Cleared '{}' via {:?}", name, strategy);
                    return Ok(ClearReport {
                        collection: name.to_string(),
                        strategy,
                        rows_before,
                        dimension,
                    });
                }
                ClearStep::Failed { remaining } => {
                    return Err(KbError::ClearExhausted {
                        collection: name.to_string(),
                        remaining,
                    });
                }
            };
        }
    }

    #[inline]
    pub async fn drop(&self, name: &str) -> Result<bool> {
        self.client.drop_collection(name).await
    }
}
