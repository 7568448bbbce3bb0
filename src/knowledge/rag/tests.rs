use super::*;
use crate::config::EnvironmentDescriptor;
use crate::database::DefaultBackendFactory;
use crate::embeddings::fallback_vector;
use crate::knowledge::models::{DocumentRecord, MetadataValue};
use std::collections::BTreeMap;

async fn seeded_service(endpoint: &str) -> RagService {
    let env = EnvironmentDescriptor {
        name: "test".to_string(),
        endpoint: endpoint.to_string(),
        credential: None,
        database: "default".to_string(),
        options: BTreeMap::new(),
    };
    let client = Arc::new(VectorStoreClient::new(
        env,
        Arc::new(DefaultBackendFactory::new()),
    ));
    client.create_collection("kb", 8).await.expect("should create");

    let records: Vec<DocumentRecord> = ["launch notes", "pricing page", "team offsite"]
        .iter()
        .enumerate()
        .map(|(i, text)| DocumentRecord {
            id: format!("doc_{i}"),
            vector: fallback_vector(text, 8),
            text: text.to_string(),
            source: format!("source_{i}"),
            metadata: Metadata::from([("rank".to_string(), MetadataValue::from(i))]),
            created_at: 0,
        })
        .collect();
    client.insert("kb", &records).await.expect("should insert");

    RagService::new(client, Arc::new(Embedder::new(None, 8)))
}

#[tokio::test]
async fn exact_match_leads_the_context() {
    let service = seeded_service("memory://rag-match").await;

    let answer = service
        .query("kb", "pricing page", 3, -1.0)
        .await
        .expect("should answer");

    assert_eq!(answer.question, "pricing page");
    assert_eq!(answer.sources.len(), 3);
    assert_eq!(answer.sources[0].id, "doc_1");
    assert!((answer.sources[0].score - 1.0).abs() < 1e-4);
    assert_eq!(
        answer.sources[0].metadata.get("rank"),
        Some(&MetadataValue::Integer(1))
    );
    assert!(answer.context.starts_with("pricing page\n\n"));
    assert_eq!(answer.context.split("\n\n").count(), 3);
}

#[tokio::test]
async fn no_hits_is_an_empty_answer() {
    let service = seeded_service("memory://rag-empty").await;

    let answer = service
        .query("kb", "something unrelated", 3, 0.99)
        .await
        .expect("should answer");

    assert!(answer.sources.is_empty());
    assert!(answer.context.is_empty());
}

#[tokio::test]
async fn missing_collection_is_an_error() {
    let service = seeded_service("memory://rag-missing").await;
    assert!(service.query("nope", "question", 3, 0.0).await.is_err());
}
