
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{
    CREATED_AT_FIELD, CollectionSchema, CollectionStats, ID_FIELD, IndexKind, IndexSpec,
    ListSyntax, MAX_ID_LENGTH, MAX_METADATA_LENGTH, MAX_SOURCE_LENGTH, MAX_TEXT_LENGTH,
    METADATA_FIELD, Metric, SOURCE_FIELD, SearchRequest, StoredHit, StoredRow, TEXT_FIELD,
    VECTOR_FIELD, VectorBackend, id_filter,
};
use crate::config::EnvironmentDescriptor;
use crate::http::send_with_retry;
use crate::{KbError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Milvus server reached through its RESTful v2 API
#[derive(Debug, Clone)]
pub struct MilvusBackend {
    base_url: Url,
    token: Option<String>,
    database: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

/// Envelope every v2 endpoint answers with; `code` 0 is success
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: String,
}

impl MilvusBackend {
    /// Build a client for the environment. No request is made until first use.
    ///
    /// `timeout_seconds` and `retry_attempts` may be set in the environment
    /// options.
    #[inline]
    pub fn new(env: &EnvironmentDescriptor) -> Result<Self> {
        let mut base_url = Url::parse(&env.endpoint).map_err(|e| {
            KbError::Config(format!("Invalid Milvus endpoint '{}': {e}", env.endpoint))
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let timeout_seconds = env
            .options
            .get("timeout_seconds")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        let retry_attempts = env
            .options
            .get("retry_attempts")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS);

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_seconds)))
            .http_status_as_error(true)
            .build()
            .into();

        Ok(Self {
            base_url,
            token: env.credential.clone(),
            database: env.database.clone(),
            agent,
            retry_attempts: retry_attempts.max(1),
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// POST to a v2 endpoint and unwrap the envelope's `data`
    async fn call(&self, path: &'static str, mut body: Value) -> Result<Value> {
        if let Some(object) = body.as_object_mut() {
            object.insert("dbName".to_string(), Value::String(self.database.clone()));
        }

        let client = self.clone();
        tokio::task::spawn_blocking(move || client.call_blocking(path, &body))
            .await
            .map_err(|e| KbError::Other(anyhow::anyhow!("Milvus request task failed: {e}")))?
    }

    fn call_blocking(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self
            .base_url
            .join("v2/vectordb/")
            .and_then(|base| base.join(path))
            .map_err(|e| KbError::Config(format!("Failed to build Milvus URL: {e}")))?;
        let request_json = body.to_string();
        let authorization = self.token.as_ref().map(|token| format!("Bearer {token}"));

        debug!("Milvus request to {}", url);
        let response_text = send_with_retry("Milvus", self.retry_attempts, || {
            let mut request = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            if let Some(authorization) = &authorization {
                request = request.header("Authorization", authorization);
            }
            request
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| KbError::Connectivity(e.to_string()))?;

        let envelope: Envelope = serde_json::from_str(&response_text).map_err(|e| {
            KbError::Store(format!("Failed to parse Milvus response from {path}: {e}"))
        })?;

        if envelope.code != 0 {
            return Err(KbError::Store(format!(
                "Milvus {path} failed (code {}): {}",
                envelope.code, envelope.message
            )));
        }

        Ok(envelope.data)
    }

    fn field_schema(schema: &CollectionSchema) -> Value {
        let varchar = |name: &str, max_length: usize, primary: bool| {
            json!({
                "fieldName": name,
                "dataType": "VarChar",
                "isPrimary": primary,
                "elementTypeParams": { "max_length": max_length.to_string() }
            })
        };

        json!({
            "autoId": false,
            "enableDynamicField": false,
            "fields": [
                varchar(ID_FIELD, MAX_ID_LENGTH, true),
                {
                    "fieldName": VECTOR_FIELD,
                    "dataType": "FloatVector",
                    "elementTypeParams": { "dim": schema.dimension.to_string() }
                },
                varchar(TEXT_FIELD, MAX_TEXT_LENGTH, false),
                varchar(SOURCE_FIELD, MAX_SOURCE_LENGTH, false),
                varchar(METADATA_FIELD, MAX_METADATA_LENGTH, false),
                { "fieldName": CREATED_AT_FIELD, "dataType": "Int64" }
            ]
        })
    }

    fn metric_name(metric: Metric) -> &'static str {
        match metric {
            Metric::InnerProduct => "IP",
        }
    }

    fn parse_hit(item: &Value) -> Result<StoredHit> {
        let text_of = |field: &str| {
            item.get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let id = match item.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => return Err(KbError::Store("Search hit without id".to_string())),
        };

        let vector = item
            .get(VECTOR_FIELD)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|v| v as f32)
                    .collect()
            })
            .unwrap_or_default();

        Ok(StoredHit {
            row: StoredRow {
                id,
                vector,
                text: text_of(TEXT_FIELD),
                source: text_of(SOURCE_FIELD),
                metadata: text_of(METADATA_FIELD),
                created_at: item
                    .get(CREATED_AT_FIELD)
                    .and_then(Value::as_i64)
                    .unwrap_or_default(),
            },
            // For IP the server reports the raw inner product as "distance"
            score: item
                .get("distance")
                .and_then(Value::as_f64)
                .unwrap_or_default() as f32,
        })
    }
}

#[async_trait]
impl VectorBackend for MilvusBackend {
    fn kind(&self) -> &'static str {
        "milvus"
    }

    async fn health_check(&self) -> Result<()> {
        self.call("collections/list", json!({})).await.map(|_| ())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let data = self
            .call("collections/has", json!({ "collectionName": name }))
            .await?;
        Ok(data.get("has").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        self.call(
            "collections/create",
            json!({
                "collectionName": schema.name,
                "schema": Self::field_schema(schema),
            }),
        )
        .await?;
        info!(
            "Created Milvus collection '{}' with {} dimensions",
            schema.name, schema.dimension
        );
        Ok(())
    }

    async fn build_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        let index_type = match spec.kind {
            IndexKind::IvfFlat => "IVF_FLAT",
        };
        self.call(
            "indexes/create",
            json!({
                "collectionName": collection,
                "indexParams": [{
                    "fieldName": spec.field,
                    "indexName": format!("{}_index", spec.field),
                    "metricType": Self::metric_name(spec.metric),
                    "indexType": index_type,
                    "params": { "nlist": spec.nlist }
                }]
            }),
        )
        .await?;
        Ok(())
    }

    async fn load_collection(&self, collection: &str) -> Result<()> {
        self.call("collections/load", json!({ "collectionName": collection }))
            .await
            .map(|_| ())
    }

    async fn insert(&self, collection: &str, rows: Vec<StoredRow>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let count = rows.len();
        let data: Vec<Value> = rows
            .into_iter()
            .map(|row| {
                json!({
                    ID_FIELD: row.id,
                    VECTOR_FIELD: row.vector,
                    TEXT_FIELD: row.text,
                    SOURCE_FIELD: row.source,
                    METADATA_FIELD: row.metadata,
                    CREATED_AT_FIELD: row.created_at,
                })
            })
            .collect();

        let result = self
            .call(
                "entities/insert",
                json!({ "collectionName": collection, "data": data }),
            )
            .await?;

        let inserted = result
            .get("insertCount")
            .and_then(Value::as_u64)
            .unwrap_or(count as u64);
        if inserted != count as u64 {
            return Err(KbError::Store(format!(
                "Milvus inserted {inserted} of {count} rows into '{collection}'"
            )));
        }
        debug!("Inserted {} rows into '{}'", count, collection);
        Ok(())
    }

    async fn flush(&self, collections: &[&str]) -> Result<()> {
        for name in collections {
            self.call("collections/flush", json!({ "collectionName": name }))
                .await?;
        }
        Ok(())
    }

    async fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<StoredHit>> {
        let data = self
            .call(
                "entities/search",
                json!({
                    "collectionName": collection,
                    "data": [request.vector],
                    "annsField": VECTOR_FIELD,
                    "limit": request.limit,
                    "outputFields": [
                        ID_FIELD,
                        TEXT_FIELD,
                        SOURCE_FIELD,
                        METADATA_FIELD,
                        CREATED_AT_FIELD
                    ],
                    "searchParams": {
                        "metricType": Self::metric_name(request.metric),
                        "params": { "nprobe": request.nprobe }
                    }
                }),
            )
            .await?;

        let mut hits = data
            .as_array()
            .map(|items| items.iter().map(Self::parse_hit).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }

    async fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let data = self
            .call("collections/get_stats", json!({ "collectionName": collection }))
            .await?;

        let row_count = match data.get("rowCount") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| KbError::Store(format!("Milvus stats for '{collection}' lack rowCount")))?;

        Ok(CollectionStats {
            row_count,
            data_size: None,
        })
    }

    async fn describe_collection(&self, collection: &str) -> Result<CollectionSchema> {
        let data = self
            .call("collections/describe", json!({ "collectionName": collection }))
            .await?;

        let dimension = data
            .get("fields")
            .and_then(Value::as_array)
            .and_then(|fields| {
                fields
                    .iter()
                    .find(|f| f.get("name").and_then(Value::as_str) == Some(VECTOR_FIELD))
            })
            .and_then(|field| field.get("params").and_then(Value::as_array))
            .and_then(|params| {
                params
                    .iter()
                    .find(|p| p.get("key").and_then(Value::as_str) == Some("dim"))
            })
            .and_then(|param| match param.get("value") {
                Some(Value::String(s)) => s.parse().ok(),
                Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
                _ => None,
            })
            .ok_or_else(|| {
                KbError::Schema(format!(
                    "Could not determine vector dimension of '{collection}'"
                ))
            })?;

        Ok(CollectionSchema::new(collection, dimension))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let data = self.call("collections/list", json!({})).await?;
        Ok(data
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.call("collections/drop", json!({ "collectionName": collection }))
            .await?;
        info!("Dropped Milvus collection '{}'", collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, expression: &str) -> Result<()> {
        self.call(
            "entities/delete",
            json!({ "collectionName": collection, "filter": expression }),
        )
        .await
        .map(|_| ())
    }

    async fn delete_ids(&self, collection: &str, ids: &[String]) -> Result<()> {
        let expression = id_filter(ids, ListSyntax::Bracketed)?;
        self.delete(collection, &expression).await
    }
}
