use super::*;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_config(base_url: &str) -> EmbeddingConfig {
    EmbeddingConfig {
        api: EmbeddingApi::OpenAi,
        base_url: base_url.to_string(),
        model: "text-embedding-3-small".to_string(),
        api_key: Some("sk-test".to_string()),
        dimension: 3,
        ..EmbeddingConfig::default()
    }
}

#[test]
fn client_configuration() {
    let config = EmbeddingConfig {
        base_url: "https://gateway.example.com/openai".to_string(),
        api_key: Some("  ".to_string()),
        ..EmbeddingConfig::default()
    };
    let client = HttpEmbeddingProvider::new(&config).expect("Failed to create client");

    assert_eq!(client.model(), "text-embedding-3-small");
    assert_eq!(client.base_url.path(), "/openai/");
    assert!(client.api_key.is_none());
    assert_eq!(client.retry_attempts, 3);
    assert_eq!(
        client.endpoint().expect("should build endpoint").as_str(),
        "https://gateway.example.com/openai/v1/embeddings"
    );
}

#[test]
fn client_builder_methods() {
    let client = HttpEmbeddingProvider::new(&EmbeddingConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(0);

    assert_eq!(client.retry_attempts, 1);
}

#[tokio::test]
async fn openai_embedding_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_json(serde_json::json!({
            "model": "text-embedding-3-small",
            "input": "hello world"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3]}],
            "model": "text-embedding-3-small"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEmbeddingProvider::new(&openai_config(&server.uri()))
        .expect("Failed to create client");
    let embedding = client.embed("hello world").await.expect("should embed");

    assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn ollama_embedding_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"embeddings": [[1.0, 0.0, 0.0]]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = EmbeddingConfig {
        api: EmbeddingApi::Ollama,
        api_key: None,
        ..openai_config(&server.uri())
    };
    let client = HttpEmbeddingProvider::new(&config).expect("Failed to create client");

    let embedding = client.embed("hello").await.expect("should embed");
    assert_eq!(embedding, vec![1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEmbeddingProvider::new(&openai_config(&server.uri()))
        .expect("Failed to create client")
        .with_retry_attempts(3);

    let result = client.embed("hello").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn empty_response_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
        .mount(&server)
        .await;

    let client = HttpEmbeddingProvider::new(&openai_config(&server.uri()))
        .expect("Failed to create client")
        .with_retry_attempts(1);

    let error = client.embed("hello").await.expect_err("should fail");
    assert!(error.to_string().contains("no vectors"));
}
