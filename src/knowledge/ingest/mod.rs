
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use uuid::Uuid;

use super::client::VectorStoreClient;
use super::models::{DocumentRecord, Metadata, MetadataValue};
use crate::{KbError, Result};
use crate::embeddings::{Chunk, ChunkingConfig, Embedder, chunk_text};

/// Leaves room for `_{chunk_index}_{8 hex}` within the id length limit
const MAX_SLUG_BYTES: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub collection: String,
    pub source: String,
    pub chunks: usize,
    pub ids: Vec<String>,
    /// Chunks embedded with the fallback generator
    pub degraded: usize,
}

/// Chunk → embed → insert → flush for one document at a time
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    client: Arc<VectorStoreClient>,
    embedder: Arc<Embedder>,
    chunking: ChunkingConfig,
    concurrency: usize,
    /// Caps embedding calls across every document ingesting through this pipeline
    embed_permits: Arc<Semaphore>,
}

impl IngestionPipeline {
    #[inline]
    pub fn new(
        client: Arc<VectorStoreClient>,
        embedder: Arc<Embedder>,
        chunking: ChunkingConfig,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            client,
            embedder,
            chunking,
            concurrency,
            embed_permits: Arc::new(Semaphore::new(concurrency)),
        }
    }

    #[inline]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Create the collection at the embedder's dimension if it is absent
    pub async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.client
            .create_collection(collection, self.embedder.dimension())
            .await
            .map(|_| ())
    }

    /// Ingest one document, creating the collection on first write.
    ///
    /// Embedding runs in sequential batches of `concurrency` chunks. No more
    /// than `concurrency` embed calls run at once across all ingests sharing
    /// this pipeline. Every record goes out in a single insert, so an
    /// embedding failure leaves the collection untouched.
    pub async fn ingest(
        &self,
        collection: &str,
        text: &str,
        source: &str,
        metadata: &Metadata,
    ) -> Result<IngestReport> {
        let chunks = chunk_text(text, &self.chunking);
        if chunks.is_empty() {
            debug!("Nothing to ingest from '{}'", source);
            return Ok(IngestReport {
                collection: collection.to_string(),
                source: source.to_string(),
                ..IngestReport::default()
            });
        }

        self.ensure_collection(collection).await?;

        let mut embeddings = Vec::with_capacity(chunks.len());
        for (batch_number, batch) in chunks.chunks(self.concurrency).enumerate() {
            debug!(
                "Embedding batch {} ({} chunks) of '{}'",
                batch_number + 1,
                batch.len(),
                source
            );
            let batch_embeddings = try_join_all(batch.iter().map(|chunk| async {
                let _permit = self.embed_permits.acquire().await.map_err(|e| {
                    KbError::Other(anyhow::anyhow!("Embedding permits closed: {e}"))
                })?;
                self.embedder.embed(&chunk.text).await
            }))
            .await?;
            embeddings.extend(batch_embeddings);
        }

        let slug = source_slug(source);
        let created_at = chrono::Utc::now().timestamp_millis();
        let mut degraded = 0;

        let records: Vec<DocumentRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                if embedding.degraded {
                    degraded += 1;
                }
                DocumentRecord {
                    id: record_id(&slug, chunk.index),
                    metadata: chunk_metadata(metadata, &chunk, embedding.degraded),
                    vector: embedding.vector,
                    text: chunk.text,
                    source: source.to_string(),
                    created_at,
                }
            })
            .collect();

        self.client.insert(collection, &records).await?;

        info!(
            "Ingested {} chunks from '{}' into '{}' ({} degraded)",
            records.len(),
            source,
            collection,
            degraded
        );

        Ok(IngestReport {
            collection: collection.to_string(),
            source: source.to_string(),
            chunks: records.len(),
            ids: records.into_iter().map(|r| r.id).collect(),
            degraded,
        })
    }
}

fn chunk_metadata(base: &Metadata, chunk: &Chunk, degraded: bool) -> Metadata {
    let mut metadata = base.clone();
    metadata.insert("chunk_index".to_string(), MetadataValue::from(chunk.index));
    metadata.insert("total_chunks".to_string(), MetadataValue::from(chunk.total));
    metadata.insert(
        "chunk_length".to_string(),
        MetadataValue::from(chunk.text.chars().count()),
    );
    if degraded {
        metadata.insert("degraded_embedding".to_string(), MetadataValue::Bool(true));
    }
    metadata
}

/// `{slug}_{chunk_index}_{8 hex chars}`
fn record_id(slug: &str, index: usize) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", slug, index, &suffix[..8])
}

/// Lowercased alphanumerics of the source, other runs collapsed to `_`,
/// capped at a byte length
pub fn source_slug(source: &str) -> String {
    let mut slug = String::new();
    for c in source.chars().flat_map(char::to_lowercase) {
        let next = if c.is_alphanumeric() {
            c
        } else if !slug.is_empty() && !slug.ends_with('_') {
            '_'
        } else {
            continue;
        };
        if slug.len() + next.len_utf8() > MAX_SLUG_BYTES {
            break;
        }
        slug.push(next);
    }

    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "doc".to_string()
    } else {
        slug.to_string()
    }
}
