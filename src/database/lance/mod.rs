#[cfg(test)]
mod tests;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::index::Index;
use lancedb::index::vector::IvfFlatIndexBuilder;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    CREATED_AT_FIELD, CollectionSchema, CollectionStats, ID_FIELD, IndexSpec, METADATA_FIELD,
    Metric, SOURCE_FIELD, SearchRequest, StoredHit, StoredRow, TEXT_FIELD, VECTOR_FIELD,
    VectorBackend,
};
use crate::config::EnvironmentDescriptor;
use crate::{KbError, Result};

/// IVF training needs enough rows per partition; smaller tables are searched
/// exhaustively until they grow past this
const MIN_ROWS_FOR_INDEX: usize = 256;

/// Embedded LanceDB store. Each collection is a Lance table.
pub struct LanceBackend {
    connection: Connection,
    uri: String,
    local_root: Option<PathBuf>,
    /// Index specs waiting for enough rows to train on
    pending_indexes: Mutex<HashMap<String, IndexSpec>>,
}

impl std::fmt::Debug for LanceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceBackend")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

impl LanceBackend {
    /// Connect to the environment's LanceDB location.
    ///
    /// The logical database becomes a sub-directory of the endpoint, so
    /// environments sharing a root stay isolated.
    #[inline]
    pub async fn connect(env: &EnvironmentDescriptor) -> Result<Self> {
        let root = env.endpoint.trim_end_matches('/');
        let uri = if env.database == EnvironmentDescriptor::DEFAULT_DATABASE {
            root.to_string()
        } else {
            format!("{}/{}", root, env.database)
        };

        let local_root = if uri.contains("://") && !uri.starts_with("file://") {
            None
        } else {
            Some(PathBuf::from(uri.trim_start_matches("file://")))
        };

        if let Some(path) = &local_root {
            std::fs::create_dir_all(path).map_err(|e| {
                KbError::Connectivity(format!(
                    "Failed to create vector database directory {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        if env.credential.is_some() {
            debug!("LanceDB ignores the environment credential; use options for object stores");
        }

        debug!("Connecting to LanceDB at {}", uri);
        let mut builder = lancedb::connect(&uri);
        for (key, value) in &env.options {
            builder = builder.storage_option(key, value);
        }
        let connection = builder.execute().await.map_err(|e| {
            KbError::Connectivity(format!("Failed to connect to LanceDB at {uri}: {e}"))
        })?;

        info!("LanceDB connected at {}", uri);
        Ok(Self {
            connection,
            uri,
            local_root,
            pending_indexes: Mutex::new(HashMap::new()),
        })
    }

    async fn open_table(&self, name: &str) -> Result<Table> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| KbError::Store(format!("Failed to open table '{name}': {e}")))
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: usize) -> Result<Arc<Schema>> {
        let dim = i32::try_from(vector_dim).map_err(|_| {
            KbError::Schema(format!("Vector dimension {vector_dim} is too large"))
        })?;

        Ok(Arc::new(Schema::new(vec![
            Field::new(ID_FIELD, DataType::Utf8, false),
            Field::new(
                VECTOR_FIELD,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    dim,
                ),
                false,
            ),
            Field::new(TEXT_FIELD, DataType::Utf8, false),
            Field::new(SOURCE_FIELD, DataType::Utf8, false),
            Field::new(METADATA_FIELD, DataType::Utf8, false),
            Field::new(CREATED_AT_FIELD, DataType::Int64, false),
        ])))
    }

    /// Create a RecordBatch from stored rows
    fn create_record_batch(rows: &[StoredRow], vector_dim: usize) -> Result<RecordBatch> {
        let len = rows.len();
        let schema = Self::create_schema(vector_dim)?;

        let mut flat_values = Vec::with_capacity(len * vector_dim);
        for row in rows {
            if row.vector.len() != vector_dim {
                return Err(KbError::Schema(format!(
                    "Row '{}' has {} dimensions, table expects {}",
                    row.id,
                    row.vector.len(),
                    vector_dim
                )));
            }
            flat_values.extend_from_slice(&row.vector);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            vector_dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| KbError::Store(format!("Failed to create vector array: {e}")))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.id))),
            Arc::new(vector_array),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.text))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.source))),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| &r.metadata),
            )),
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.created_at),
            )),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| KbError::Store(format!("Failed to create record batch: {e}")))
    }

    /// Detect vector dimension from an existing table schema
    async fn detect_vector_dimension(&self, table: &Table) -> Result<usize> {
        let schema = table
            .schema()
            .await
            .map_err(|e| KbError::Store(format!("Failed to get table schema: {e}")))?;

        for field in schema.fields() {
            if field.name() == VECTOR_FIELD {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(KbError::Schema(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// Build a deferred index once the table has enough rows to train it
    async fn build_pending_index(&self, name: &str) -> Result<()> {
        let Some(spec) = self.pending_indexes.lock().await.get(name).cloned() else {
            return Ok(());
        };

        let table = self.open_table(name).await?;
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| KbError::Store(format!("Failed to count rows: {e}")))?;

        let min_rows = MIN_ROWS_FOR_INDEX.max(spec.nlist as usize);
        if rows < min_rows {
            debug!(
                "Table '{}' has {} rows, deferring index until {}",
                name, rows, min_rows
            );
            return Ok(());
        }

        let distance_type = match spec.metric {
            Metric::InnerProduct => DistanceType::Dot,
        };
        table
            .create_index(
                &[spec.field.as_str()],
                Index::IvfFlat(
                    IvfFlatIndexBuilder::default()
                        .distance_type(distance_type)
                        .num_partitions(spec.nlist),
                ),
            )
            .execute()
            .await
            .map_err(|e| KbError::Store(format!("Failed to create vector index: {e}")))?;

        self.pending_indexes.lock().await.remove(name);
        info!("Vector index built for table '{}' ({} rows)", name, rows);
        Ok(())
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<StoredHit>> {
        let ids = string_column(batch, ID_FIELD)?;
        let texts = string_column(batch, TEXT_FIELD)?;
        let sources = string_column(batch, SOURCE_FIELD)?;
        let metadata = string_column(batch, METADATA_FIELD)?;
        let created_ats = batch
            .column_by_name(CREATED_AT_FIELD)
            .and_then(|col| col.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| KbError::Store("Missing or invalid created_at column".to_string()))?;
        let vectors = batch
            .column_by_name(VECTOR_FIELD)
            .and_then(|col| col.as_any().downcast_ref::<FixedSizeListArray>());
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut hits = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let vector = vectors
                .and_then(|v| {
                    v.value(row)
                        .as_any()
                        .downcast_ref::<Float32Array>()
                        .map(|values| values.values().to_vec())
                })
                .unwrap_or_default();

            let distance = distances
                .filter(|d| !d.is_null(row))
                .map_or(0.0, |d| d.value(row));

            hits.push(StoredHit {
                row: StoredRow {
                    id: ids.value(row).to_string(),
                    vector,
                    text: texts.value(row).to_string(),
                    source: sources.value(row).to_string(),
                    metadata: metadata.value(row).to_string(),
                    created_at: created_ats.value(row),
                },
                // Lance reports dot distance as 1 - a·b
                score: 1.0 - distance,
            });
        }

        Ok(hits)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| KbError::Store(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| KbError::Store(format!("Invalid {name} column type")))
}

fn directory_size(path: &Path) -> Option<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path).ok()? {
        let entry = entry.ok()?;
        let metadata = entry.metadata().ok()?;
        total += if metadata.is_dir() {
            directory_size(&entry.path())?
        } else {
            metadata.len()
        };
    }
    Some(total)
}

#[async_trait]
impl VectorBackend for LanceBackend {
    fn kind(&self) -> &'static str {
        "lancedb"
    }

    async fn health_check(&self) -> Result<()> {
        self.connection
            .table_names()
            .execute()
            .await
            .map(|_| ())
            .map_err(|e| {
                KbError::Connectivity(format!("LanceDB at {} is unhealthy: {e}", self.uri))
            })
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.list_collections().await?.iter().any(|t| t == name))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let arrow_schema = Self::create_schema(schema.dimension)?;
        self.connection
            .create_empty_table(&schema.name, arrow_schema)
            .execute()
            .await
            .map_err(|e| KbError::Store(format!("Failed to create table '{}': {e}", schema.name)))?;

        info!(
            "Created table '{}' with {} dimensions",
            schema.name, schema.dimension
        );
        Ok(())
    }

    async fn build_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        if spec.field != VECTOR_FIELD {
            return Err(KbError::Schema(format!(
                "Cannot index non-vector field '{}'",
                spec.field
            )));
        }

        self.pending_indexes
            .lock()
            .await
            .insert(collection.to_string(), spec.clone());
        self.build_pending_index(collection).await
    }

    async fn load_collection(&self, collection: &str) -> Result<()> {
        // Lance tables are query-ready once they open
        self.open_table(collection).await.map(|_| ())
    }

    async fn insert(&self, collection: &str, rows: Vec<StoredRow>) -> Result<()> {
        if rows.is_empty() {
            debug!("No rows to insert");
            return Ok(());
        }

        let table = self.open_table(collection).await?;
        let dimension = self.detect_vector_dimension(&table).await?;
        let record_batch = Self::create_record_batch(&rows, dimension)?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| KbError::Store(format!("Failed to insert rows: {e}")))?;

        debug!("Inserted {} rows into '{}'", rows.len(), collection);
        Ok(())
    }

    async fn flush(&self, collections: &[&str]) -> Result<()> {
        // Appends are committed by `add`; flushing only catches up deferred indexes
        for name in collections {
            if let Err(e) = self.build_pending_index(name).await {
                warn!("Deferred index build failed for '{}': {}", name, e);
            }
        }
        Ok(())
    }

    async fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<StoredHit>> {
        let table = self.open_table(collection).await?;
        let distance_type = match request.metric {
            Metric::InnerProduct => DistanceType::Dot,
        };

        let mut results = table
            .vector_search(request.vector.as_slice())
            .map_err(|e| KbError::Store(format!("Failed to create vector search: {e}")))?
            .column(VECTOR_FIELD)
            .distance_type(distance_type)
            .nprobes(request.nprobe as usize)
            .limit(request.limit)
            .execute()
            .await
            .map_err(|e| KbError::Store(format!("Failed to execute search: {e}")))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| KbError::Store(format!("Failed to read result stream: {e}")))?
        {
            hits.extend(Self::parse_search_batch(&batch)?);
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!("Search on '{}' returned {} hits", collection, hits.len());
        Ok(hits)
    }

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let table = self.open_table(collection).await?;
        let row_count = table
            .count_rows(None)
            .await
            .map_err(|e| KbError::Store(format!("Failed to count rows: {e}")))?;

        let data_size = self
            .local_root
            .as_ref()
            .and_then(|root| directory_size(&root.join(format!("{collection}.lance"))));

        Ok(CollectionStats {
            row_count: row_count as u64,
            data_size,
        })
    }

    async fn describe_collection(&self, collection: &str) -> Result<CollectionSchema> {
        let table = self.open_table(collection).await?;
        let dimension = self.detect_vector_dimension(&table).await?;
        Ok(CollectionSchema::new(collection, dimension))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| KbError::Store(format!("Failed to list tables: {e}")))
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.connection
            .drop_table(collection)
            .await
            .map_err(|e| KbError::Store(format!("Failed to drop table '{collection}': {e}")))?;
        self.pending_indexes.lock().await.remove(collection);
        info!("Dropped table '{}'", collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, expression: &str) -> Result<()> {
        let table = self.open_table(collection).await?;
        table
            .delete(expression)
            .await
            .map_err(|e| KbError::Store(format!("Failed to delete with '{expression}': {e}")))?;
        Ok(())
    }
}
