use super::*;
use crate::database::DefaultBackendFactory;
use crate::knowledge::models::{Metadata, MetadataValue};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

fn memory_env(endpoint: &str) -> EnvironmentDescriptor {
    EnvironmentDescriptor {
        name: "test".to_string(),
        endpoint: endpoint.to_string(),
        credential: None,
        database: "default".to_string(),
        options: BTreeMap::new(),
    }
}

fn client() -> VectorStoreClient {
    VectorStoreClient::new(
        memory_env("memory://client-tests"),
        Arc::new(DefaultBackendFactory::new()),
    )
}

fn record(id: &str, vector: Vec<f32>) -> DocumentRecord {
    DocumentRecord {
        id: id.to_string(),
        vector,
        text: format!("text {id}"),
        source: "unit".to_string(),
        metadata: Metadata::from([("tag".to_string(), MetadataValue::from(id))]),
        created_at: 1_700_000_000_000,
    }
}

#[derive(Debug, Default)]
struct CountingFactory {
    inner: DefaultBackendFactory,
    opens: AtomicUsize,
}

#[async_trait]
impl BackendFactory for CountingFactory {
    async fn open(&self, env: &EnvironmentDescriptor) -> Result<Arc<dyn VectorBackend>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(env).await
    }
}

#[derive(Debug)]
struct UnreachableFactory;

#[async_trait]
impl BackendFactory for UnreachableFactory {
    async fn open(&self, env: &EnvironmentDescriptor) -> Result<Arc<dyn VectorBackend>> {
        Err(KbError::Connectivity(format!("{} is down", env.endpoint)))
    }
}

#[tokio::test]
async fn backend_opens_once_per_client() {
    let factory = Arc::new(CountingFactory::default());
    let client = VectorStoreClient::new(memory_env("memory://once"), factory.clone());

    assert_eq!(factory.opens.load(Ordering::SeqCst), 0);
    assert!(client.connect().await);
    client.list_collections().await.expect("should list");
    assert_eq!(factory.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connect_reports_false_on_failure() {
    let client = VectorStoreClient::new(memory_env("memory://down"), Arc::new(UnreachableFactory));
    assert!(!client.connect().await);
    assert!(!client.delete_by_filter("kb", "id != ''").await);
    assert!(matches!(
        client.list_collections().await,
        Err(KbError::Connectivity(_))
    ));
}

#[tokio::test]
async fn create_collection_is_idempotent() {
    let client = client();
    assert!(client.create_collection("kb", 4).await.expect("should create"));
    assert!(client.create_collection("kb", 4).await.expect("should be a no-op"));
    assert_eq!(
        client.list_collections().await.expect("should list"),
        vec!["kb".to_string()]
    );
    assert_eq!(
        client.describe("kb").await.expect("should describe").dimension,
        4
    );
}

#[tokio::test]
async fn create_collection_rejects_invalid_names() {
    let client = client();
    assert!(matches!(
        client.create_collection("9lives", 4).await,
        Err(KbError::Config(_))
    ));
    assert!(client.create_collection("has-dash", 4).await.is_err());
}

#[tokio::test]
async fn insert_then_search_round_trip() {
    let client = client();
    client.create_collection("kb", 2).await.expect("should create");

    assert!(
        client
            .insert(
                "kb",
                &[
                    record("east", vec![1.0, 0.0]),
                    record("north", vec![0.0, 1.0]),
                ],
            )
            .await
            .expect("should insert")
    );

    let results = client
        .search("kb", &[1.0, 0.0], 5, 0.5)
        .await
        .expect("should search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "east");
    assert_eq!(results[0].text, "text east");
    assert_eq!(
        results[0].metadata.get("tag"),
        Some(&MetadataValue::from("east"))
    );

    let stats = client.stats("kb").await.expect("should get stats");
    assert_eq!(stats.row_count, 2);
}

#[tokio::test]
async fn insert_rejects_dimension_mismatch() {
    let client = client();
    client.create_collection("kb", 3).await.expect("should create");

    let result = client
        .insert(
            "kb",
            &[record("ok", vec![1.0, 0.0, 0.0]), record("bad", vec![1.0])],
        )
        .await;
    assert!(matches!(result, Err(KbError::Schema(_))));
    assert_eq!(client.stats("kb").await.expect("should get stats").row_count, 0);
}

#[tokio::test]
async fn search_with_zero_top_k_is_empty() {
    let client = client();
    client.create_collection("kb", 1).await.expect("should create");
    client
        .insert("kb", &[record("a", vec![1.0])])
        .await
        .expect("should insert");

    assert!(
        client
            .search("kb", &[1.0], 0, 0.0)
            .await
            .expect("should search")
            .is_empty()
    );
}

#[tokio::test]
async fn delete_by_id_and_drop() {
    let client = client();
    client.create_collection("kb", 1).await.expect("should create");
    client
        .insert(
            "kb",
            &[record("a", vec![1.0]), record("b", vec![0.5])],
        )
        .await
        .expect("should insert");

    assert!(client.delete_by_id("kb", &["a".to_string()]).await);
    assert_eq!(client.stats("kb").await.expect("should get stats").row_count, 1);
    assert!(!client.delete_by_id("kb", &["it's".to_string()]).await);
    assert!(client.delete_by_id("kb", &[]).await);

    assert!(client.drop_collection("kb").await.expect("should drop"));
    assert!(!client.drop_collection("kb").await.expect("nothing to drop"));
    assert!(!client.has_collection("kb").await.expect("should check"));
}
