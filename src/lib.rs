//! feedcast - RSS feeds in, published podcast episodes out
//!
//! Aggregates recent articles, writes a script with a text-generation API,
//! reads it aloud with a text-to-speech API and publishes the audio with an
//! RSS index. Every episode is a persisted state machine that resumes at the
//! first incomplete stage.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod feed;
pub mod files;
pub mod ipc;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod retry;
pub mod script;
pub mod sys;

// Stage boundaries
pub use audio::speech::SpeechSynthesizer;
pub use feed::source::FeedSource;
pub use publish::backend::HostingBackend;
pub use script::generator::TextGenerator;

// Pipeline
pub use pipeline::orchestrator::{Orchestrator, RunHandle, Stages};
pub use pipeline::{Episode, EpisodeState, EpisodeStore, ProgressReporter, Stage};

// Error handling
pub use error::{CallError, FeedcastError, Result};

// Config
pub use config::{Config, ConfigStore, PodcastConfig};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
