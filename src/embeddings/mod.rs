// Embeddings module
// Provider integration, the fallback-aware embedder and text chunking

pub mod chunking;
pub mod embedder;
pub mod provider;

pub use chunking::{Chunk, ChunkingConfig, chunk_text, split_sentences};
pub use embedder::{Embedder, Embedding, fallback_vector};
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider};
