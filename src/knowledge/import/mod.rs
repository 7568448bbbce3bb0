
use futures::future::join_all;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ingest::IngestionPipeline;
use super::models::{DocumentInput, Metadata, MetadataValue};
use crate::{KbError, Result};

pub type RawRow = Map<String, Value>;

const TITLE_ALIASES: &[&str] = &["title", "标题", "subject", "name"];
const CONTENT_ALIASES: &[&str] = &["content", "text", "body", "正文", "内容", "description"];
const PLATFORM_ALIASES: &[&str] = &["platform", "平台", "channel"];
const AUTHOR_ALIASES: &[&str] = &["author", "作者", "user", "nickname"];
const TAG_ALIASES: &[&str] = &["tags", "标签", "tag", "hashtags", "keywords"];
const LIKE_ALIASES: &[&str] = &["likes", "点赞", "点赞数", "like_count", "likes_count"];
const COMMENT_ALIASES: &[&str] = &[
    "comments",
    "评论",
    "评论数",
    "comment_count",
    "comments_count",
];
const SHARE_ALIASES: &[&str] = &[
    "shares",
    "分享",
    "分享数",
    "转发",
    "share_count",
    "shares_count",
];
const URL_ALIASES: &[&str] = &["url", "link", "链接"];
const PUBLISHED_ALIASES: &[&str] = &["published_at", "发布时间", "publish_time", "date"];

const TAG_DELIMITERS: &[char] = &[',', '，', ';', '|', '、', '#'];

/// A social post after column aliasing and type coercion
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostDocument {
    pub title: String,
    pub content: String,
    pub platform: String,
    pub author: String,
    pub tags: Vec<String>,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub url: String,
    pub published_at: String,
}

impl PostDocument {
    pub fn from_row(row: &RawRow) -> Self {
        Self {
            title: text_field(row, TITLE_ALIASES),
            content: text_field(row, CONTENT_ALIASES),
            platform: text_field(row, PLATFORM_ALIASES),
            author: text_field(row, AUTHOR_ALIASES),
            tags: lookup(row, TAG_ALIASES).map(split_tags).unwrap_or_default(),
            likes: lookup(row, LIKE_ALIASES).map_or(0, coerce_count),
            comments: lookup(row, COMMENT_ALIASES).map_or(0, coerce_count),
            shares: lookup(row, SHARE_ALIASES).map_or(0, coerce_count),
            url: text_field(row, URL_ALIASES),
            published_at: text_field(row, PUBLISHED_ALIASES),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.content.is_empty()
    }

    pub fn to_input(&self) -> DocumentInput {
        let text = match (self.title.is_empty(), self.content.is_empty()) {
            (false, false) => format!("{}\n\n{}", self.title, self.content),
            (false, true) => self.title.clone(),
            _ => self.content.clone(),
        };

        let source = [&self.url, &self.title]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "post".to_string());

        let mut metadata = Metadata::new();
        metadata.insert("kind".to_string(), MetadataValue::from("post"));
        for (key, value) in [
            ("title", &self.title),
            ("platform", &self.platform),
            ("author", &self.author),
            ("url", &self.url),
            ("published_at", &self.published_at),
        ] {
            if !value.is_empty() {
                metadata.insert(key.to_string(), MetadataValue::from(value.clone()));
            }
        }
        if !self.tags.is_empty() {
            metadata.insert("tags".to_string(), MetadataValue::List(self.tags.clone()));
        }
        metadata.insert("likes".to_string(), MetadataValue::Integer(self.likes));
        metadata.insert("comments".to_string(), MetadataValue::Integer(self.comments));
        metadata.insert("shares".to_string(), MetadataValue::Integer(self.shares));

        DocumentInput {
            text,
            source,
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub total: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks: usize,
    /// `row N: reason` for each failed row, 1-based
    pub errors: Vec<String>,
}

fn lookup<'a>(row: &'a RawRow, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        row.iter()
            .find(|(key, value)| key.trim().eq_ignore_ascii_case(alias) && !value.is_null())
            .map(|(_, value)| value)
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn text_field(row: &RawRow, aliases: &[&str]) -> String {
    lookup(row, aliases).map(value_text).unwrap_or_default()
}

/// Split delimiter-joined tags; order kept, duplicates and empties dropped
pub fn split_tags(value: &Value) -> Vec<String> {
    let joined = match value {
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(","),
        other => value_text(other),
    };

    let mut tags: Vec<String> = Vec::new();
    for tag in joined.split(TAG_DELIMITERS).map(str::trim) {
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Counts arrive as numbers, floats or strings like `1,024`, `3k` or `1.2万`;
/// anything unreadable is 0
pub fn coerce_count(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        Value::String(s) => parse_count(s),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

fn parse_count(raw: &str) -> i64 {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
    if cleaned.is_empty() {
        return 0;
    }

    let (number, multiplier) = if let Some(n) = cleaned.strip_suffix(['万', 'w', 'W']) {
        (n, 10_000.0)
    } else if let Some(n) = cleaned.strip_suffix(['k', 'K']) {
        (n, 1_000.0)
    } else {
        (cleaned.as_str(), 1.0)
    };

    number
        .trim()
        .parse::<f64>()
        .map(|n| (n * multiplier).round() as i64)
        .unwrap_or(0)
}

/// Rows from a JSON array, or an object holding one under `posts` or `data`
pub fn parse_json_rows(input: &str) -> Result<Vec<RawRow>> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| KbError::Import(format!("Invalid JSON: {e}")))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => {
            match object.remove("posts").or_else(|| object.remove("data")) {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(KbError::Import(
                        "JSON object has no 'posts' or 'data' array".to_string(),
                    ));
                }
            }
        }
        _ => return Err(KbError::Import("Expected a JSON array of posts".to_string())),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(row) => Ok(row),
            other => Err(KbError::Import(format!(
                "Row {} is not an object: {}",
                i + 1,
                other
            ))),
        })
        .collect()
}

/// Rows from CSV with a header line; every cell is a string
pub fn parse_csv_rows(input: &str) -> Result<Vec<RawRow>> {
    let input = input.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| KbError::Import(format!("Invalid CSV header: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| KbError::Import(format!("Invalid CSV row {}: {e}", i + 1)))?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.to_string(), Value::String(cell.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Pick the parser from the file extension
pub fn read_rows(path: &Path) -> Result<Vec<RawRow>> {
    let input = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("json") => parse_json_rows(&input),
        Some("csv") => parse_csv_rows(&input),
        _ => Err(KbError::Import(format!(
            "Unsupported import file {}; expected .json or .csv",
            path.display()
        ))),
    }
}

/// Feeds normalized posts through the ingestion pipeline
#[derive(Debug, Clone)]
pub struct PostImporter {
    pipeline: Arc<IngestionPipeline>,
}

impl PostImporter {
    #[inline]
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self { pipeline }
    }

    pub async fn import_file(
        &self,
        collection: &str,
        path: &Path,
        progress: &ProgressBar,
    ) -> Result<ImportReport> {
        let rows = read_rows(path)?;
        info!("Importing {} rows from {}", rows.len(), path.display());
        self.import_rows(collection, rows, progress).await
    }

    /// Ingest rows in batches of the pipeline's concurrency. A failing row
    /// is counted and reported; it does not stop the import.
    pub async fn import_rows(
        &self,
        collection: &str,
        rows: Vec<RawRow>,
        progress: &ProgressBar,
    ) -> Result<ImportReport> {
        let mut report = ImportReport {
            total: rows.len(),
            ..ImportReport::default()
        };
        progress.set_length(rows.len() as u64);

        let mut pending = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let post = PostDocument::from_row(row);
            if post.is_empty() {
                debug!("Skipping row {} without title or content", i + 1);
                report.skipped += 1;
                progress.inc(1);
            } else {
                pending.push((i + 1, post.to_input()));
            }
        }

        // Created once up front so concurrent rows never race on creation
        if !pending.is_empty() {
            self.pipeline.ensure_collection(collection).await?;
        }

        for batch in pending.chunks(self.pipeline.concurrency()) {
            let results = join_all(batch.iter().map(|(_, input)| {
                self.pipeline
                    .ingest(collection, &input.text, &input.source, &input.metadata)
            }))
            .await;

            for ((row_number, _), result) in batch.iter().zip(results) {
                match result {
                    Ok(ingested) => {
                        report.imported += 1;
                        report.chunks += ingested.chunks;
                    }
                    Err(e) => {
                        warn!("Row {} failed to import: {}", row_number, e);
                        report.failed += 1;
                        report.errors.push(format!("row {row_number}: {e}"));
                    }
                }
            }
            progress.inc(batch.len() as u64);
        }

        info!(
            "Import into '{}' finished: {} imported, {} skipped, {} failed",
            collection, report.imported, report.skipped, report.failed
        );
        Ok(report)
    }
}
