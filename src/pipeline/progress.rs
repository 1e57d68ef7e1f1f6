//! Progress reporting for pipeline runs.

use crate::pipeline::episode::{Episode, EpisodeState, Stage};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// Receives stage boundaries of every run.
pub trait ProgressReporter: Send + Sync {
    fn stage_started(&self, episode: &Episode, stage: Stage);

    fn stage_completed(&self, episode: &Episode, stage: Stage, elapsed: Duration);

    /// Called once per run with the final persisted record.
    fn run_finished(&self, episode: &Episode);
}

/// Reporter that writes tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn stage_started(&self, episode: &Episode, stage: Stage) {
        info!(
            episode_id = %episode.id,
            podcast_id = %episode.podcast_id,
            %stage,
            "Stage started"
        );
    }

    fn stage_completed(&self, episode: &Episode, stage: Stage, elapsed: Duration) {
        info!(
            episode_id = %episode.id,
            %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage completed"
        );
    }

    fn run_finished(&self, episode: &Episode) {
        for warning in &episode.warnings {
            warn!(episode_id = %episode.id, %warning, "Episode warning");
        }
        match &episode.state {
            EpisodeState::Published => info!(
                episode_id = %episode.id,
                url = episode.publish.as_ref().map(|p| p.url.as_str()).unwrap_or_default(),
                "Episode published"
            ),
            EpisodeState::Failed { stage, reason } => error!(
                episode_id = %episode.id,
                %stage,
                %reason,
                "Run failed"
            ),
            state => warn!(episode_id = %episode.id, %state, "Run stopped"),
        }
    }
}

/// One reported event, for inspecting runs in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started(Stage),
    Completed(Stage),
    Finished(EpisodeState),
}

/// Reporter that keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn push(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl ProgressReporter for CollectingReporter {
    fn stage_started(&self, _episode: &Episode, stage: Stage) {
        self.push(ProgressEvent::Started(stage));
    }

    fn stage_completed(&self, _episode: &Episode, stage: Stage, _elapsed: Duration) {
        self.push(ProgressEvent::Completed(stage));
    }

    fn run_finished(&self, episode: &Episode) {
        self.push(ProgressEvent::Finished(episode.state.clone()));
    }
}
