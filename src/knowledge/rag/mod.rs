#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::client::VectorStoreClient;
use super::models::{Metadata, QueryResult};
use crate::Result;
use crate::embeddings::Embedder;

const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceExcerpt {
    pub id: String,
    pub text: String,
    pub source: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl From<QueryResult> for SourceExcerpt {
    fn from(result: QueryResult) -> Self {
        Self {
            id: result.id,
            text: result.text,
            source: result.source,
            metadata: result.metadata,
            score: result.score,
        }
    }
}

/// Retrieved context for a question, ready to go into a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub question: String,
    pub context: String,
    pub sources: Vec<SourceExcerpt>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RagService {
    client: Arc<VectorStoreClient>,
    embedder: Arc<Embedder>,
}

impl RagService {
    #[inline]
    pub fn new(client: Arc<VectorStoreClient>, embedder: Arc<Embedder>) -> Self {
        Self { client, embedder }
    }

    /// Embed the question and gather the best matching chunks.
    /// No hits is an empty answer, not an error.
    pub async fn query(
        &self,
        collection: &str,
        question: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<RagAnswer> {
        debug!("RAG query on '{}': {}", collection, question);

        let embedding = self.embedder.embed(question).await?;
        let results = self
            .client
            .search(collection, &embedding.vector, top_k, min_score)
            .await?;

        let context = results
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let sources: Vec<SourceExcerpt> = results.into_iter().map(SourceExcerpt::from).collect();

        info!(
            "RAG query on '{}' returned {} sources",
            collection,
            sources.len()
        );

        Ok(RagAnswer {
            question: question.to_string(),
            context,
            sources,
            timestamp: Utc::now(),
        })
    }
}
