use super::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn descriptor(endpoint: &str, database: &str) -> EnvironmentDescriptor {
    EnvironmentDescriptor {
        name: "test".to_string(),
        endpoint: endpoint.to_string(),
        credential: None,
        database: database.to_string(),
        options: BTreeMap::new(),
    }
}

fn row(id: &str, vector: Vec<f32>) -> StoredRow {
    StoredRow {
        id: id.to_string(),
        vector,
        text: format!("text for {id}"),
        source: "unit".to_string(),
        metadata: r#"{"tag":"x"}"#.to_string(),
        created_at: 1_700_000_000_000,
    }
}

async fn backend_with_collection(temp_dir: &TempDir, dimension: usize) -> LanceBackend {
    let endpoint = temp_dir.path().to_string_lossy().to_string();
    let backend = LanceBackend::connect(&descriptor(&endpoint, "default"))
        .await
        .expect("should connect");
    backend
        .create_collection(&CollectionSchema::new("kb", dimension))
        .await
        .expect("should create table");
    backend
}

#[test]
fn schema_matches_row_layout() {
    let schema = LanceBackend::create_schema(8).expect("should build schema");
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(
        names,
        vec!["id", "vector", "text", "source", "metadata", "created_at"]
    );
}

#[test]
fn record_batch_rejects_wrong_dimension() {
    let result = LanceBackend::create_record_batch(&[row("a", vec![1.0])], 2);
    assert!(matches!(result, Err(KbError::Schema(_))));
}

#[tokio::test]
async fn database_becomes_subdirectory() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let endpoint = temp_dir.path().to_string_lossy().to_string();

    let backend = LanceBackend::connect(&descriptor(&endpoint, "staging"))
        .await
        .expect("should connect");
    backend.health_check().await.expect("should be healthy");

    assert!(temp_dir.path().join("staging").is_dir());
}

#[tokio::test]
async fn insert_and_search_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let backend = backend_with_collection(&temp_dir, 2).await;

    backend
        .insert(
            "kb",
            vec![row("near", vec![1.0, 0.0]), row("far", vec![0.0, 1.0])],
        )
        .await
        .expect("should insert");
    backend.flush(&["kb"]).await.expect("should flush");

    let hits = backend
        .search("kb", &SearchRequest::new(vec![1.0, 0.0], 2))
        .await
        .expect("should search");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].row.id, "near");
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert!(hits[1].score.abs() < 1e-4);
    assert_eq!(hits[0].row.metadata, r#"{"tag":"x"}"#);
    assert_eq!(hits[0].row.created_at, 1_700_000_000_000);
}

#[tokio::test]
async fn stats_describe_and_delete() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let backend = backend_with_collection(&temp_dir, 3).await;

    backend
        .insert(
            "kb",
            vec![
                row("a", vec![1.0, 0.0, 0.0]),
                row("b", vec![0.0, 1.0, 0.0]),
                row("c", vec![0.0, 0.0, 1.0]),
            ],
        )
        .await
        .expect("should insert");

    let stats = backend.collection_stats("kb").await.expect("should get stats");
    assert_eq!(stats.row_count, 3);
    assert!(stats.data_size.is_some_and(|size| size > 0));

    assert_eq!(
        backend.describe_collection("kb").await.expect("should describe"),
        CollectionSchema::new("kb", 3)
    );

    backend
        .delete("kb", "id IN ('a', 'b')")
        .await
        .expect("should delete");
    let stats = backend.collection_stats("kb").await.expect("should get stats");
    assert_eq!(stats.row_count, 1);

    backend.delete("kb", "id != ''").await.expect("should delete");
    let stats = backend.collection_stats("kb").await.expect("should get stats");
    assert_eq!(stats.row_count, 0);
}

#[tokio::test]
async fn small_tables_defer_index_build() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let backend = backend_with_collection(&temp_dir, 2).await;

    backend
        .build_index("kb", &IndexSpec::default())
        .await
        .expect("should accept index spec");
    assert!(backend.pending_indexes.lock().await.contains_key("kb"));

    backend.load_collection("kb").await.expect("should load");
    backend.flush(&["kb"]).await.expect("should flush");
    assert!(backend.pending_indexes.lock().await.contains_key("kb"));
}

#[tokio::test]
async fn drop_removes_table() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let backend = backend_with_collection(&temp_dir, 2).await;

    assert!(backend.has_collection("kb").await.expect("should check"));
    backend.drop_collection("kb").await.expect("should drop");
    assert!(!backend.has_collection("kb").await.expect("should check"));
    assert!(backend.load_collection("kb").await.is_err());
}
