//! Error types for feedcast.

use crate::pipeline::episode::Stage;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedcastError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Podcast not found: {id}")]
    PodcastNotFound { id: String },

    // Stage errors
    #[error("No content available: all {failed_sources} feed source(s) failed")]
    NoContentAvailable { failed_sources: usize },

    #[error("Cannot synthesize a script from an empty article set")]
    EmptyArticleSet,

    #[error("Script generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("Audio synthesis failed for segment {segment}: {message}")]
    SynthesisFailed { segment: usize, message: String },

    #[error("Audio format error: {message}")]
    AudioFormat { message: String },

    #[error("Publishing failed: {message}")]
    PublishFailed { message: String },

    #[error("Publishing incomplete: artifact uploaded to {url} but index update failed: {message}")]
    PublishPartial {
        url: String,
        content_hash: String,
        message: String,
    },

    #[error("Stage {stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    #[error("Run cancelled before stage {stage}")]
    Cancelled { stage: Stage },

    // Episode lifecycle errors
    #[error("Episode not found: {id}")]
    EpisodeNotFound { id: String },

    #[error("Episode {id} already has an active run")]
    AlreadyRunning { id: String },

    #[error("Episode {id} has no active run")]
    NotRunning { id: String },

    #[error("Episode {id} is published and can no longer change")]
    EpisodeImmutable { id: String },

    #[error("Episode {id} is {state} and has nothing to retry")]
    NothingToRetry { id: String, state: String },

    #[error("Invalid episode transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Episode store error: {message}")]
    Store { message: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, FeedcastError>;

/// Failure of a single call across an external boundary
/// (feed fetch, text generation, speech synthesis, hosting).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// Expected to succeed on retry (rate limit, 5xx, connection reset).
    #[error("transient: {0}")]
    Transient(String),

    /// The attempt exceeded its deadline. Retried like `Transient`.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Retrying cannot help (bad credentials, malformed request, quota).
    #[error("{0}")]
    Permanent(String),
}

impl CallError {
    /// Whether the retry policy may try again after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_) | CallError::Timeout(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", body.trim())
        };
        match status.as_u16() {
            408 | 425 | 429 => CallError::Transient(message),
            s if s >= 500 => CallError::Transient(message),
            _ => CallError::Permanent(message),
        }
    }

    /// Classify a reqwest transport error.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            CallError::Transient(error.to_string())
        } else if let Some(status) = error.status() {
            CallError::from_status(status, "")
        } else {
            CallError::Permanent(error.to_string())
        }
    }
}
