//! JSON line protocol between the CLI (or a dashboard) and the daemon.

use crate::pipeline::episode::{Episode, EpisodeState, EpisodeWarning, StageFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Commands sent to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Create an episode for a podcast and start its run
    Generate { podcast_id: String },
    /// Resume a failed, cancelled or interrupted episode
    Retry { episode_id: String },
    /// Stop an active run at the next stage boundary
    Cancel { episode_id: String },
    /// Discard all outputs and run again from the start
    Regenerate { episode_id: String },
    /// Current state of one episode
    Status { episode_id: String },
    /// Episodes, newest first
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        podcast_id: Option<String>,
    },
    /// Shutdown the daemon
    Shutdown,
}

impl Command {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// What a client sees of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub id: String,
    pub podcast_id: String,
    pub state: EpisodeState,
    pub running: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub warnings: Vec<EpisodeWarning>,
    #[serde(default)]
    pub last_error: Option<StageFailure>,
}

impl EpisodeSummary {
    pub fn new(episode: &Episode, running: bool) -> Self {
        Self {
            id: episode.id.clone(),
            podcast_id: episode.podcast_id.clone(),
            state: episode.state.clone(),
            running,
            created_at: episode.created_at,
            updated_at: episode.updated_at,
            url: episode.publish.as_ref().map(|p| p.url.clone()),
            warnings: episode.warnings.clone(),
            last_error: episode.last_error.clone(),
        }
    }
}

/// Responses sent by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    /// A run was started for this episode
    Started { episode_id: String },
    Episode { episode: EpisodeSummary },
    Episodes { episodes: Vec<EpisodeSummary> },
    Error { message: String },
}

impl Response {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
