//! Data passed between pipeline stages.
//!
//! Everything here is serializable because stage outputs are persisted in
//! the episode record between transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A normalized feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Feed URL the article came from.
    pub source: String,
    /// Human-readable feed title (falls back to the feed host).
    pub source_title: String,
    pub title: String,
    /// Description or content, tags stripped.
    pub body: String,
    pub published_at: DateTime<Utc>,
    /// Canonical link, used for deduplication.
    pub url: String,
}

/// Output of the aggregation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSet {
    /// Newest first, deduplicated by URL.
    pub articles: Vec<Article>,
    /// Number of sources that could not be fetched or parsed.
    pub failed_sources: usize,
    pub fetched_at: DateTime<Utc>,
}

/// One contiguous span of script text for a single speech request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    /// Estimated spoken duration in seconds.
    pub estimated_secs: f32,
    /// Speaker tag from the script, mapped to a voice by the podcast settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Output of the scripting stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub segments: Vec<Segment>,
    /// Word count the generation request asked for.
    pub target_words: u32,
}

impl Script {
    /// Full script text, segments separated by blank lines.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn word_count(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.text.split_whitespace().count())
            .sum()
    }

    pub fn estimated_secs(&self) -> f32 {
        self.segments.iter().map(|s| s.estimated_secs).sum()
    }
}

/// Output of the audio stage: one WAV file on local disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
    /// Hex SHA-256 of the file contents.
    pub content_hash: String,
    pub duration_secs: f32,
    pub sample_rate: u32,
    pub byte_len: u64,
    pub segments: usize,
}

/// Descriptive data published alongside the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    /// Episode id, used as the index guid.
    pub guid: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub duration_secs: f32,
}

/// Proof that the artifact landed on the hosting target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub url: String,
    pub remote_path: String,
    pub content_hash: String,
}

/// Output of the publishing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    pub url: String,
    pub commit_ref: String,
    pub published_at: DateTime<Utc>,
}
