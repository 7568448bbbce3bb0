#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

/// End-to-end behaviour of the knowledge base over in-process stores
use async_trait::async_trait;
use kb_core::config::{Config, EnvironmentConfig, EnvironmentDescriptor};
use kb_core::database::{BackendFactory, DefaultBackendFactory, VectorBackend};
use kb_core::embeddings::{ChunkingConfig, Embedder, chunk_text};
use kb_core::knowledge::{
    ClearStrategy, DocumentInput, DocumentRecord, KnowledgeBase, Metadata, MetadataValue,
    VectorStoreClient,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const DEMO_DIMENSION: usize = 8;

/// Remembers every endpoint it was asked to open
#[derive(Debug, Default)]
struct RecordingFactory {
    inner: DefaultBackendFactory,
    opened: Mutex<Vec<String>>,
}

impl RecordingFactory {
    fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl BackendFactory for RecordingFactory {
    async fn open(&self, env: &EnvironmentDescriptor) -> kb_core::Result<Arc<dyn VectorBackend>> {
        self.opened
            .lock()
            .expect("lock poisoned")
            .push(env.endpoint.clone());
        self.inner.open(env).await
    }
}

fn two_environment_config() -> Config {
    Config {
        default_environment: "dev".to_string(),
        environments: BTreeMap::from([
            ("dev".to_string(), EnvironmentConfig::new("memory://dev")),
            ("prod".to_string(), EnvironmentConfig::new("memory://prod")),
        ]),
        ..Config::default()
    }
}

fn demo_client() -> VectorStoreClient {
    let env = EnvironmentDescriptor {
        name: "demo".to_string(),
        endpoint: "memory://kb-demo".to_string(),
        credential: None,
        database: "default".to_string(),
        options: BTreeMap::new(),
    };
    VectorStoreClient::new(env, Arc::new(DefaultBackendFactory::new()))
}

fn axis(index: usize) -> Vec<f32> {
    let mut vector = vec![0.0; DEMO_DIMENSION];
    vector[index] = 1.0;
    vector
}

fn demo_record(id: &str, vector: Vec<f32>, text: &str) -> DocumentRecord {
    DocumentRecord {
        id: id.to_string(),
        vector,
        text: text.to_string(),
        source: "kb_demo".to_string(),
        metadata: Metadata::from([("demo".to_string(), MetadataValue::Bool(true))]),
        created_at: chrono::Utc::now().timestamp_millis(),
    }
}

#[tokio::test]
async fn kb_demo_scenario() {
    let client = demo_client();
    assert!(client.connect().await);
    assert!(
        client
            .create_collection("kb_demo", DEMO_DIMENSION)
            .await
            .expect("should create")
    );
    assert!(
        client
            .create_collection("kb_demo", DEMO_DIMENSION)
            .await
            .expect("second create is a no-op")
    );

    let records = vec![
        demo_record("doc_a", axis(0), "Launch calendar for spring."),
        demo_record("doc_b", axis(1), "Pricing experiments."),
        demo_record("doc_c", axis(2), "Creator partnership notes."),
    ];
    assert!(client.insert("kb_demo", &records).await.expect("should insert"));
    assert_eq!(
        client.stats("kb_demo").await.expect("should get stats").row_count,
        3
    );

    let hits = client
        .search("kb_demo", &axis(1), 3, 0.5)
        .await
        .expect("should search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "doc_b");
    assert_eq!(hits[0].text, "Pricing experiments.");

    assert!(client.delete_by_id("kb_demo", &["doc_a".to_string()]).await);
    assert_eq!(
        client.stats("kb_demo").await.expect("should get stats").row_count,
        2
    );

    let lifecycle = kb_core::knowledge::CollectionLifecycle::new(Arc::new(client));
    let report = lifecycle.clear("kb_demo").await.expect("should clear");
    assert_eq!(report.rows_before, 2);
    assert_eq!(report.strategy, ClearStrategy::FilterDelete);
    assert_eq!(report.dimension, DEMO_DIMENSION);
}

#[tokio::test]
async fn cleared_collection_accepts_new_rows() {
    let client = Arc::new(demo_client());
    client
        .create_collection("kb_demo", DEMO_DIMENSION)
        .await
        .expect("should create");
    client
        .insert("kb_demo", &[demo_record("old", axis(3), "Old note.")])
        .await
        .expect("should insert");

    kb_core::knowledge::CollectionLifecycle::new(client.clone())
        .clear("kb_demo")
        .await
        .expect("should clear");
    assert_eq!(
        client.stats("kb_demo").await.expect("should get stats").row_count,
        0
    );

    client
        .insert("kb_demo", &[demo_record("new", axis(4), "New note.")])
        .await
        .expect("should reinsert");
    let hits = client
        .search("kb_demo", &axis(4), 5, 0.9)
        .await
        .expect("should search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "new");
}

#[tokio::test]
async fn min_score_above_best_match_returns_nothing() {
    let client = demo_client();
    client
        .create_collection("kb_demo", DEMO_DIMENSION)
        .await
        .expect("should create");

    // Unit vector whose inner product with the first axis is 0.4
    let mut vector = vec![0.0; DEMO_DIMENSION];
    vector[0] = 0.4;
    vector[1] = (1.0_f32 - 0.16).sqrt();
    client
        .insert("kb_demo", &[demo_record("weak", vector, "Loosely related.")])
        .await
        .expect("should insert");

    let strict = client
        .search("kb_demo", &axis(0), 5, 0.99)
        .await
        .expect("should search");
    assert!(strict.is_empty());

    let lenient = client
        .search("kb_demo", &axis(0), 5, 0.3)
        .await
        .expect("should search");
    assert_eq!(lenient.len(), 1);
    assert!((lenient[0].score - 0.4).abs() < 1e-5);
}

#[tokio::test]
async fn environment_switch_reconnects_to_new_endpoint() {
    let factory = Arc::new(RecordingFactory::default());
    let kb = KnowledgeBase::with_parts(
        &two_environment_config(),
        factory.clone(),
        Embedder::new(None, DEMO_DIMENSION),
    );

    assert!(kb.create_collection("shared_name", None).await.success);
    assert_eq!(factory.opened(), vec!["memory://dev".to_string()]);

    let switched = kb.switch_environment("prod").await;
    assert!(switched.success);
    // Nothing is opened until the new client is used
    assert_eq!(factory.opened().len(), 1);

    let collections = kb
        .list_collections()
        .await
        .into_result()
        .expect("should list");
    assert!(collections.is_empty());
    assert_eq!(
        factory.opened(),
        vec!["memory://dev".to_string(), "memory://prod".to_string()]
    );
    assert_eq!(kb.current_environment().await.name, "prod");

    kb.switch_environment("dev").await;
    let collections = kb
        .list_collections()
        .await
        .into_result()
        .expect("should list");
    assert_eq!(collections, vec!["shared_name".to_string()]);
}

#[tokio::test]
async fn ingest_and_answer_through_facade() {
    let kb = KnowledgeBase::with_parts(
        &two_environment_config(),
        Arc::new(DefaultBackendFactory::new()),
        Embedder::new(None, DEMO_DIMENSION),
    );

    let document = DocumentInput::new(
        "Spring launches lead engagement. Pricing tests come second.",
        "quarterly-review.md",
    )
    .with_metadata("quarter", "Q2");
    let report = kb
        .add_document("knowledge_base", &document)
        .await
        .into_result()
        .expect("should ingest");
    assert_eq!(report.chunks, 1);
    assert_eq!(report.degraded, 1);

    let answer = kb
        .query(
            "knowledge_base",
            "Spring launches lead engagement. Pricing tests come second.",
            Some(3),
            Some(0.9),
        )
        .await
        .into_result()
        .expect("should answer");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].source, "quarterly-review.md");
    assert_eq!(
        answer.sources[0].metadata.get("quarter"),
        Some(&MetadataValue::from("Q2"))
    );
    assert_eq!(answer.context, document.text);

    let cleared = kb
        .clear_collection("knowledge_base")
        .await
        .into_result()
        .expect("should clear");
    assert_eq!(cleared.rows_before, 1);

    let empty = kb
        .query("knowledge_base", "anything at all", None, None)
        .await
        .into_result()
        .expect("should answer");
    assert!(empty.sources.is_empty());
    assert!(empty.context.is_empty());
}

#[tokio::test]
async fn empty_text_embeds_to_zero_and_fallback_is_unit_norm() {
    let embedder = Embedder::new(None, 1536);

    let zero = embedder.embed("   ").await.expect("should embed");
    assert!(zero.vector.iter().all(|v| *v == 0.0));
    assert_eq!(zero.vector.len(), 1536);

    let fallback = embedder.embed("some post").await.expect("should embed");
    let norm = fallback.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
    assert!(fallback.degraded);
}

#[test]
fn chunking_keeps_short_text_and_bounds_long_text() {
    let config = ChunkingConfig::default();
    let short = "A short post. Only two sentences.";
    let chunks = chunk_text(short, &config);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, short);

    let long = "This sentence is exactly forty-one chars. ".repeat(50);
    for chunk in chunk_text(&long, &config) {
        assert!(chunk.text.chars().count() <= config.chunk_size);
    }
}
