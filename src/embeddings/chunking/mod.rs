#[cfg(test)]
mod tests;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Sentence ends: ASCII terminal punctuation followed by whitespace, or CJK
/// terminal punctuation with optional whitespace
static SENTENCE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?<=[.!?])\s+|(?<=[。！？])\s*").expect("valid regex")
});

const CJK_TERMINALS: [char; 3] = ['。', '！', '？'];

/// A bounded slice of a longer text, produced before embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Position of this chunk within its parent text
    pub index: usize,
    /// Number of chunks the parent text produced
    pub total: usize,
}

/// Configuration for text chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters of trailing whole sentences repeated at the start of the
    /// next chunk. Zero keeps chunks disjoint.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 0,
        }
    }
}

/// Split `text` into chunks of at most `config.chunk_size` characters.
///
/// Sentences are never cut: a single sentence longer than the limit becomes
/// its own oversized chunk. Text that already fits is returned unchanged as
/// one chunk.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let pieces = chunk_strings(text, config);
    let total = pieces.len();

    debug!(
        "Chunked {} chars into {} chunks (limit {}, overlap {})",
        char_len(text),
        total,
        config.chunk_size,
        config.overlap
    );

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { text, index, total })
        .collect()
}

fn chunk_strings(text: &str, config: &ChunkingConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    if char_len(text) <= config.chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();

    for sentence in split_sentences(text) {
        if !buffer.is_empty() && appended_len(&buffer, sentence) > config.chunk_size {
            chunks.push(join_sentences(&buffer));
            buffer = carry_over(&buffer, sentence, config);
        }
        buffer.push(sentence);
    }

    if !buffer.is_empty() {
        chunks.push(join_sentences(&buffer));
    }

    chunks.retain(|chunk| !chunk.trim().is_empty());
    chunks
}

/// Split text into trimmed, non-empty sentences
#[inline]
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        let boundary = match boundary {
            Ok(boundary) => boundary,
            Err(e) => {
                warn!("Sentence splitting stopped early: {}", e);
                break;
            }
        };
        if boundary.start() < start {
            continue;
        }

        let sentence = text[start..boundary.start()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = boundary.end();
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Trailing sentences of the emitted buffer that start the next one
fn carry_over<'a>(buffer: &[&'a str], next: &str, config: &ChunkingConfig) -> Vec<&'a str> {
    if config.overlap == 0 {
        return Vec::new();
    }

    let mut start = buffer.len();
    while start > 0 {
        let candidate = &buffer[start - 1..];
        if joined_len(candidate) > config.overlap
            || appended_len(candidate, next) > config.chunk_size
        {
            break;
        }
        start -= 1;
    }

    buffer[start..].to_vec()
}

fn join_sentences(sentences: &[&str]) -> String {
    let mut joined = String::new();
    for sentence in sentences {
        if needs_separator(&joined) {
            joined.push(' ');
        }
        joined.push_str(sentence);
    }
    joined
}

fn joined_len(sentences: &[&str]) -> usize {
    let mut len = 0;
    let mut previous: Option<&str> = None;
    for sentence in sentences {
        if previous.is_some_and(needs_separator) {
            len += 1;
        }
        len += char_len(sentence);
        previous = Some(sentence);
    }
    len
}

fn appended_len(buffer: &[&str], next: &str) -> usize {
    let separator = buffer.last().is_some_and(|last| needs_separator(last));
    joined_len(buffer) + usize::from(separator) + char_len(next)
}

/// CJK sentences are joined without a space
fn needs_separator(previous: &str) -> bool {
    previous
        .chars()
        .last()
        .is_some_and(|c| !CJK_TERMINALS.contains(&c))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
