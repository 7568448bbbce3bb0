
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use super::provider::{EmbeddingProvider, HttpEmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::{KbError, Result};

/// A vector produced for one input text
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    /// True when the vector came from the deterministic fallback generator
    /// instead of the provider
    pub degraded: bool,
}

/// Turns text into fixed-dimension vectors, degrading to deterministic
/// pseudo-vectors when the provider is missing or failing
#[derive(Debug, Clone)]
pub struct Embedder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    dimension: usize,
    max_input_chars: usize,
    fallback_on_error: bool,
}

impl Embedder {
    #[inline]
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>, dimension: usize) -> Self {
        Self {
            provider,
            dimension,
            max_input_chars: EmbeddingConfig::default().max_input_chars,
            fallback_on_error: true,
        }
    }

    /// Build from configuration. Without credentials no provider is created
    /// and every embedding is a fallback vector.
    #[inline]
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider: Option<Arc<dyn EmbeddingProvider>> = if config.has_credentials() {
            let provider = HttpEmbeddingProvider::new(config)
                .map_err(|e| KbError::Config(format!("Invalid embedding provider: {e:#}")))?;
            Some(Arc::new(provider))
        } else {
            warn!("No embedding credentials configured, using fallback vectors only");
            None
        };

        Ok(Self {
            provider,
            dimension: config.dimension as usize,
            max_input_chars: config.max_input_chars,
            fallback_on_error: config.fallback_on_error,
        })
    }

    #[inline]
    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars.max(1);
        self
    }

    #[inline]
    pub fn with_fallback_on_error(mut self, fallback_on_error: bool) -> Self {
        self.fallback_on_error = fallback_on_error;
        self
    }

    #[inline]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Whether every embedding will come from the fallback generator
    #[inline]
    pub const fn is_degraded(&self) -> bool {
        self.provider.is_none()
    }

    /// Embed one text.
    ///
    /// Blank text yields a zero vector without calling the provider. Input
    /// longer than the configured cap is truncated before sending.
    #[inline]
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Ok(Embedding {
                vector: vec![0.0; self.dimension],
                degraded: false,
            });
        }

        let input = truncate_chars(text, self.max_input_chars);

        let Some(provider) = &self.provider else {
            return Ok(self.fallback(input, "no provider configured"));
        };

        match provider.embed(input).await {
            Ok(vector) if vector.len() == self.dimension => Ok(Embedding {
                vector,
                degraded: false,
            }),
            Ok(vector) => {
                let reason = format!(
                    "provider returned {} dimensions, expected {}",
                    vector.len(),
                    self.dimension
                );
                self.recover(input, reason)
            }
            Err(e) => self.recover(input, format!("{e:#}")),
        }
    }

    fn recover(&self, input: &str, reason: String) -> Result<Embedding> {
        if self.fallback_on_error {
            Ok(self.fallback(input, &reason))
        } else {
            Err(KbError::Embedding(reason))
        }
    }

    fn fallback(&self, input: &str, reason: &str) -> Embedding {
        warn!(
            "Embedding degraded to fallback vector ({}), input length {}",
            reason,
            input.len()
        );
        Embedding {
            vector: fallback_vector(input, self.dimension),
            degraded: true,
        }
    }
}

/// Deterministic unit-norm pseudo-embedding seeded by the text's SHA-256
#[inline]
pub fn fallback_vector(text: &str, dimension: usize) -> Vec<f32> {
    if dimension == 0 {
        return Vec::new();
    }

    let digest = Sha256::digest(text.as_bytes());
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    let mut rng = StdRng::from_seed(seed);

    let mut vector: Vec<f32> = (0..dimension)
        .map(|_| rng.gen_range(-1.0f32..1.0))
        .collect();

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    } else {
        debug!("Fallback vector collapsed to zero, using first basis vector");
        vector.fill(0.0);
        vector[0] = 1.0;
    }

    vector
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => {
            debug!("Truncating embedding input to {} characters", max_chars);
            &text[..byte_index]
        }
        None => text,
    }
}
