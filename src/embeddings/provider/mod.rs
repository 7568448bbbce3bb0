#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::{EmbeddingApi, EmbeddingConfig};
use crate::http::send_with_retry;

/// Remote text embedding service
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Embed a single, already length-capped input
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn model(&self) -> &str;
}

/// Embedding client for OpenAI compatible and Ollama HTTP APIs
#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
    base_url: Url,
    api: EmbeddingApi,
    model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbeddingProvider {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let mut base_url = config
            .base_url()
            .context("Failed to parse embedding provider URL from config")?;

        // Relative joins must keep any path prefix of the base URL
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            api: config.api,
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            agent,
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    fn endpoint(&self) -> Result<Url> {
        let path = match self.api {
            EmbeddingApi::OpenAi => "v1/embeddings",
            EmbeddingApi::Ollama => "api/embed",
        };
        self.base_url
            .join(path)
            .context("Failed to build embedding URL")
    }

    /// Blocking request; run on the blocking pool from async code
    fn embed_blocking(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Requesting embedding for text (length: {})", text.len());

        let url = self.endpoint()?;
        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: text,
        })
        .context("Failed to serialize embedding request")?;

        let authorization = self.api_key.as_ref().map(|key| format!("Bearer {key}"));

        let response_text =
            send_with_retry("Embedding provider", self.retry_attempts, || {
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
            .context("Failed to generate embedding")?;

        let embedding = match self.api {
            EmbeddingApi::OpenAi => {
                let response: OpenAiEmbedResponse = serde_json::from_str(&response_text)
                    .context("Failed to parse embedding response")?;
                response.data.into_iter().next().map(|item| item.embedding)
            }
            EmbeddingApi::Ollama => {
                let response: OllamaEmbedResponse = serde_json::from_str(&response_text)
                    .context("Failed to parse embedding response")?;
                response.embeddings.into_iter().next()
            }
        }
        .ok_or_else(|| anyhow::anyhow!("Embedding response contained no vectors"))?;

        debug!("Received embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let client = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || client.embed_blocking(&text))
            .await
            .context("Embedding request task failed")?
    }

    fn model(&self) -> &str {
        &self.model
    }
}
