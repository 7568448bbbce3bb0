
use async_trait::async_trait;
use fancy_regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    CollectionSchema, CollectionStats, ID_FIELD, IndexSpec, SOURCE_FIELD, SearchRequest,
    StoredHit, StoredRow, TEXT_FIELD, VECTOR_FIELD, VectorBackend,
};
use crate::{KbError, Result};

static COMPARISON_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\w+)\s*(==|=|!=)\s*'([^']*)'\s*$").expect("valid regex")
});

static IN_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\w+)\s+(?i:in)\s*[\(\[](.*)[\)\]]\s*$").expect("valid regex")
});

/// Parsed form of the filter expressions the knowledge base emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    Ne(String, String),
    In(String, Vec<String>),
}

impl Filter {
    /// Parse `field = 'v'`, `field != 'v'` or `field IN ('a', 'b')`
    pub fn parse(expression: &str) -> Result<Self> {
        let unsupported =
            || KbError::Store(format!("Unsupported filter expression: {expression}"));

        if let Some(caps) = COMPARISON_FILTER
            .captures(expression)
            .map_err(|_| unsupported())?
        {
            let field = caps[1].to_string();
            let value = caps[3].to_string();
            Self::check_field(&field, expression)?;
            return Ok(if &caps[2] == "!=" {
                Self::Ne(field, value)
            } else {
                Self::Eq(field, value)
            });
        }

        if let Some(caps) = IN_FILTER.captures(expression).map_err(|_| unsupported())? {
            let field = caps[1].to_string();
            Self::check_field(&field, expression)?;
            let mut values = Vec::new();
            for item in caps[2].split(',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let value = item
                    .strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
                    .or_else(|| item.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                    .ok_or_else(unsupported)?;
                values.push(value.to_string());
            }
            return Ok(Self::In(field, values));
        }

        Err(unsupported())
    }

    fn check_field(field: &str, expression: &str) -> Result<()> {
        if [ID_FIELD, SOURCE_FIELD, TEXT_FIELD].contains(&field) {
            Ok(())
        } else {
            Err(KbError::Store(format!(
                "Unknown field '{field}' in filter expression: {expression}"
            )))
        }
    }

    pub fn matches(&self, row: &StoredRow) -> bool {
        let value_of = |field: &str| match field {
            ID_FIELD => row.id.as_str(),
            SOURCE_FIELD => row.source.as_str(),
            _ => row.text.as_str(),
        };

        match self {
            Self::Eq(field, value) => value_of(field) == value,
            Self::Ne(field, value) => value_of(field) != value,
            Self::In(field, values) => values.iter().any(|v| v == value_of(field)),
        }
    }
}

#[derive(Debug)]
struct MemoryCollection {
    schema: CollectionSchema,
    /// Rows visible to reads
    rows: Vec<StoredRow>,
    /// Inserted rows waiting for a flush
    pending: Vec<StoredRow>,
    index: Option<IndexSpec>,
    loaded: bool,
}

/// In-process vector store with the same observable contract as a remote one:
/// writes become visible on flush and searches need a loaded collection
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryBackend {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index definition of a collection, if one was built
    pub async fn index_of(&self, collection: &str) -> Option<IndexSpec> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.index.clone())
    }

    fn missing(collection: &str) -> KbError {
        KbError::Store(format!("Collection '{collection}' does not exist"))
    }
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn row_size(row: &StoredRow) -> u64 {
    (row.id.len() + row.vector.len() * 4 + row.text.len() + row.source.len() + row.metadata.len()
        + 8) as u64
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        if schema.dimension == 0 {
            return Err(KbError::Schema("Vector dimension must be positive".to_string()));
        }

        let mut collections = self.collections.write().await;
        if collections.contains_key(&schema.name) {
            return Err(KbError::Store(format!(
                "Collection '{}' already exists",
                schema.name
            )));
        }

        collections.insert(
            schema.name.clone(),
            MemoryCollection {
                schema: schema.clone(),
                rows: Vec::new(),
                pending: Vec::new(),
                index: None,
                loaded: false,
            },
        );
        debug!("Created in-memory collection '{}'", schema.name);
        Ok(())
    }

    async fn build_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        if spec.field != VECTOR_FIELD {
            return Err(KbError::Schema(format!(
                "Cannot index non-vector field '{}'",
                spec.field
            )));
        }

        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;
        entry.index = Some(spec.clone());
        Ok(())
    }

    async fn load_collection(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;
        entry.loaded = true;
        Ok(())
    }

    async fn insert(&self, collection: &str, rows: Vec<StoredRow>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;

        if let Some(row) = rows
            .iter()
            .find(|row| row.vector.len() != entry.schema.dimension)
        {
            return Err(KbError::Schema(format!(
                "Row '{}' has {} dimensions, collection '{}' expects {}",
                row.id,
                row.vector.len(),
                collection,
                entry.schema.dimension
            )));
        }

        entry.pending.extend(rows);
        Ok(())
    }

    async fn flush(&self, collections: &[&str]) -> Result<()> {
        let mut stored = self.collections.write().await;
        for name in collections {
            let entry = stored.get_mut(*name).ok_or_else(|| Self::missing(name))?;
            let pending = std::mem::take(&mut entry.pending);
            entry.rows.extend(pending);
        }
        Ok(())
    }

    async fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<StoredHit>> {
        let collections = self.collections.read().await;
        let entry = collections
            .get(collection)
            .ok_or_else(|| Self::missing(collection))?;

        if !entry.loaded {
            return Err(KbError::Store(format!(
                "Collection '{collection}' is not loaded"
            )));
        }

        if request.vector.len() != entry.schema.dimension {
            return Err(KbError::Schema(format!(
                "Query vector has {} dimensions, collection '{}' expects {}",
                request.vector.len(),
                collection,
                entry.schema.dimension
            )));
        }

        let mut hits: Vec<StoredHit> = entry
            .rows
            .iter()
            .map(|row| StoredHit {
                score: inner_product(&row.vector, &request.vector),
                row: row.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let collections = self.collections.read().await;
        let entry = collections
            .get(collection)
            .ok_or_else(|| Self::missing(collection))?;

        Ok(CollectionStats {
            row_count: entry.rows.len() as u64,
            data_size: Some(entry.rows.iter().map(row_size).sum()),
        })
    }

    async fn describe_collection(&self, collection: &str) -> Result<CollectionSchema> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.schema.clone())
            .ok_or_else(|| Self::missing(collection))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.collections
            .write()
            .await
            .remove(collection)
            .map(|_| ())
            .ok_or_else(|| Self::missing(collection))
    }

    async fn delete(&self, collection: &str, expression: &str) -> Result<()> {
        let filter = Filter::parse(expression)?;

        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;

        let before = entry.rows.len() + entry.pending.len();
        entry.rows.retain(|row| !filter.matches(row));
        entry.pending.retain(|row| !filter.matches(row));
        debug!(
            "Deleted {} rows from '{}' with '{}'",
            before - entry.rows.len() - entry.pending.len(),
            collection,
            expression
        );
        Ok(())
    }
}
