//! The episode record and its state machine.
//!
//! An [`Episode`] is the unit of persistence and recovery. Stage outputs are
//! stored on the record as they complete, and the next stage to run is always
//! derived from which outputs are present, so a failed, cancelled or
//! interrupted run resumes at the first missing output.

use crate::error::{FeedcastError, Result};
use crate::pipeline::types::{ArticleSet, AudioArtifact, PublishResult, Script, UploadReceipt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Aggregating,
    Scripting,
    SynthesizingAudio,
    Publishing,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Aggregating,
        Stage::Scripting,
        Stage::SynthesizingAudio,
        Stage::Publishing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Aggregating => "aggregating",
            Stage::Scripting => "scripting",
            Stage::SynthesizingAudio => "synthesizing_audio",
            Stage::Publishing => "publishing",
        }
    }

    /// The in-progress state for this stage.
    pub fn state(self) -> EpisodeState {
        match self {
            Stage::Aggregating => EpisodeState::Aggregating,
            Stage::Scripting => EpisodeState::Scripting,
            Stage::SynthesizingAudio => EpisodeState::SynthesizingAudio,
            Stage::Publishing => EpisodeState::Publishing,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EpisodeState {
    Pending,
    Aggregating,
    Scripting,
    SynthesizingAudio,
    Publishing,
    /// Audio uploaded, index update outstanding.
    PublishPartial,
    Published,
    Failed {
        stage: Stage,
        reason: String,
    },
    /// Stopped at a stage boundary; `stage` is the stage that would have run next.
    Cancelled {
        stage: Stage,
    },
}

impl EpisodeState {
    /// Position in the forward sequence. `None` for the failure-like states,
    /// which sit beside the sequence rather than on it.
    fn rank(&self) -> Option<u8> {
        match self {
            EpisodeState::Pending => Some(0),
            EpisodeState::Aggregating => Some(1),
            EpisodeState::Scripting => Some(2),
            EpisodeState::SynthesizingAudio => Some(3),
            EpisodeState::Publishing => Some(4),
            EpisodeState::Published => Some(5),
            EpisodeState::PublishPartial
            | EpisodeState::Failed { .. }
            | EpisodeState::Cancelled { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EpisodeState::Pending => "pending",
            EpisodeState::Aggregating => "aggregating",
            EpisodeState::Scripting => "scripting",
            EpisodeState::SynthesizingAudio => "synthesizing_audio",
            EpisodeState::Publishing => "publishing",
            EpisodeState::PublishPartial => "publish_partial",
            EpisodeState::Published => "published",
            EpisodeState::Failed { .. } => "failed",
            EpisodeState::Cancelled { .. } => "cancelled",
        }
    }

    /// A stage is (or was, if the process died) executing.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            EpisodeState::Aggregating
                | EpisodeState::Scripting
                | EpisodeState::SynthesizingAudio
                | EpisodeState::Publishing
        )
    }

    /// Stopped short of publication in a way a manual retry can pick up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EpisodeState::Failed { .. }
                | EpisodeState::Cancelled { .. }
                | EpisodeState::PublishPartial
        )
    }

    /// Whether moving from `self` to `to` keeps the stage sequence monotonic.
    pub fn can_transition(&self, to: &EpisodeState) -> bool {
        use EpisodeState as S;
        match (self, to) {
            (S::Published, _) => false,
            (S::Cancelled { .. }, S::Cancelled { .. }) => false,
            (_, S::Cancelled { .. }) => true,
            (from, S::Failed { stage, .. }) => *from == stage.state(),
            (S::Publishing, S::PublishPartial) => true,
            (_, S::PublishPartial) => false,
            (S::Failed { stage, .. }, to) | (S::Cancelled { stage }, to) => *to == stage.state(),
            (S::PublishPartial, to) => *to == S::Publishing,
            (from, to) => match (from.rank(), to.rank()) {
                (Some(a), Some(b)) => b == a || b == a + 1,
                _ => false,
            },
        }
    }
}

impl fmt::Display for EpisodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeState::Failed { stage, reason } => write!(f, "failed({stage}): {reason}"),
            EpisodeState::Cancelled { stage } => write!(f, "cancelled(before {stage})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Non-fatal conditions attached to an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EpisodeWarning {
    /// Synthesized audio is outside the configured tolerance.
    DurationMismatch {
        actual_secs: f32,
        target_secs: u32,
        tolerance_pct: f32,
    },
    /// Some feed sources could not be read.
    SourcesUnavailable { failed: usize, total: usize },
}

impl fmt::Display for EpisodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeWarning::DurationMismatch {
                actual_secs,
                target_secs,
                tolerance_pct,
            } => write!(
                f,
                "duration {actual_secs:.1}s is outside {target_secs}s ±{tolerance_pct}%"
            ),
            EpisodeWarning::SourcesUnavailable { failed, total } => {
                write!(f, "{failed} of {total} feed sources unavailable")
            }
        }
    }
}

/// Last failure recorded on an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One generated podcast instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub podcast_id: String,
    pub state: EpisodeState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub articles: Option<ArticleSet>,
    #[serde(default)]
    pub script: Option<Script>,
    #[serde(default)]
    pub audio: Option<AudioArtifact>,
    #[serde(default)]
    pub upload: Option<UploadReceipt>,
    #[serde(default)]
    pub publish: Option<PublishResult>,
    #[serde(default)]
    pub warnings: Vec<EpisodeWarning>,
    #[serde(default)]
    pub last_error: Option<StageFailure>,
}

impl Episode {
    /// Create a pending episode for a podcast.
    pub fn new(podcast_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            podcast_id: podcast_id.to_string(),
            state: EpisodeState::Pending,
            created_at: now,
            updated_at: now,
            articles: None,
            script: None,
            audio: None,
            upload: None,
            publish: None,
            warnings: Vec::new(),
            last_error: None,
        }
    }

    pub fn is_published(&self) -> bool {
        self.state == EpisodeState::Published
    }

    /// First stage whose output has not been persisted yet.
    pub fn next_stage(&self) -> Option<Stage> {
        if self.articles.is_none() {
            Some(Stage::Aggregating)
        } else if self.script.is_none() {
            Some(Stage::Scripting)
        } else if self.audio.is_none() {
            Some(Stage::SynthesizingAudio)
        } else if self.publish.is_none() {
            Some(Stage::Publishing)
        } else {
            None
        }
    }

    /// Move to `to`, rejecting anything that would regress the sequence.
    pub fn transition(&mut self, to: EpisodeState) -> Result<()> {
        if self.is_published() {
            return Err(FeedcastError::EpisodeImmutable {
                id: self.id.clone(),
            });
        }
        if !self.state.can_transition(&to) {
            return Err(FeedcastError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        self.touch();
        Ok(())
    }

    /// Record a stage failure and move to `Failed`.
    pub fn fail(&mut self, stage: Stage, error: &FeedcastError) -> Result<()> {
        let reason = error.to_string();
        self.transition(EpisodeState::Failed {
            stage,
            reason: reason.clone(),
        })?;
        self.last_error = Some(StageFailure {
            stage,
            message: reason,
            at: self.updated_at,
        });
        Ok(())
    }

    /// Record an upload whose index update failed.
    pub fn publish_partial(&mut self, receipt: UploadReceipt, message: &str) -> Result<()> {
        self.transition(EpisodeState::PublishPartial)?;
        self.upload = Some(receipt);
        self.last_error = Some(StageFailure {
            stage: Stage::Publishing,
            message: message.to_string(),
            at: self.updated_at,
        });
        Ok(())
    }

    pub fn record_articles(&mut self, articles: ArticleSet) -> Result<()> {
        self.ensure_running(Stage::Aggregating)?;
        self.articles = Some(articles);
        self.touch();
        Ok(())
    }

    pub fn record_script(&mut self, script: Script) -> Result<()> {
        self.ensure_running(Stage::Scripting)?;
        self.script = Some(script);
        self.touch();
        Ok(())
    }

    pub fn record_audio(&mut self, audio: AudioArtifact) -> Result<()> {
        self.ensure_running(Stage::SynthesizingAudio)?;
        self.audio = Some(audio);
        self.touch();
        Ok(())
    }

    /// Remember a completed upload so a retry can skip it.
    pub fn record_upload(&mut self, receipt: UploadReceipt) -> Result<()> {
        self.ensure_running(Stage::Publishing)?;
        self.upload = Some(receipt);
        self.touch();
        Ok(())
    }

    /// Store the publish result and finish the episode.
    pub fn record_published(&mut self, result: PublishResult) -> Result<()> {
        self.ensure_running(Stage::Publishing)?;
        self.transition(EpisodeState::Published)?;
        self.publish = Some(result);
        self.last_error = None;
        Ok(())
    }

    /// Attach a warning, replacing an earlier one of the same kind.
    pub fn warn(&mut self, warning: EpisodeWarning) {
        self.warnings
            .retain(|w| std::mem::discriminant(w) != std::mem::discriminant(&warning));
        self.warnings.push(warning);
        self.touch();
    }

    /// Discard every stage output and start over from `Pending`.
    pub fn reset(&mut self) -> Result<()> {
        if self.is_published() {
            return Err(FeedcastError::EpisodeImmutable {
                id: self.id.clone(),
            });
        }
        self.state = EpisodeState::Pending;
        self.articles = None;
        self.script = None;
        self.audio = None;
        self.upload = None;
        self.publish = None;
        self.warnings.clear();
        self.last_error = None;
        self.touch();
        Ok(())
    }

    fn ensure_running(&self, stage: Stage) -> Result<()> {
        if self.state != stage.state() {
            return Err(FeedcastError::InvalidTransition {
                from: self.state.to_string(),
                to: format!("{stage} output"),
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Segment;
    use std::path::PathBuf;

    fn article_set() -> ArticleSet {
        ArticleSet {
            articles: Vec::new(),
            failed_sources: 0,
            fetched_at: Utc::now(),
        }
    }

    fn script() -> Script {
        Script {
            segments: vec![Segment {
                text: "Hello.".to_string(),
                estimated_secs: 0.4,
                speaker: None,
            }],
            target_words: 1,
        }
    }

    fn audio() -> AudioArtifact {
        AudioArtifact {
            path: PathBuf::from("/tmp/episode.wav"),
            content_hash: "abc".to_string(),
            duration_secs: 1.0,
            sample_rate: 24000,
            byte_len: 48044,
            segments: 1,
        }
    }

    fn publish_result() -> PublishResult {
        PublishResult {
            url: "https://example.org/podcasts/a.wav".to_string(),
            commit_ref: "deadbeef".to_string(),
            published_at: Utc::now(),
        }
    }

    /// Drive an episode through the happy path up to (not including) `stop`.
    fn advanced_to(stop: Stage) -> Episode {
        let mut episode = Episode::new("daily");
        for stage in Stage::ALL {
            episode.transition(stage.state()).unwrap();
            if stage == stop {
                return episode;
            }
            match stage {
                Stage::Aggregating => episode.record_articles(article_set()).unwrap(),
                Stage::Scripting => episode.record_script(script()).unwrap(),
                Stage::SynthesizingAudio => episode.record_audio(audio()).unwrap(),
                Stage::Publishing => unreachable!(),
            }
        }
        episode
    }

    #[test]
    fn test_new_episode_is_pending_and_starts_with_aggregation() {
        let episode = Episode::new("daily");
        assert_eq!(episode.state, EpisodeState::Pending);
        assert_eq!(episode.next_stage(), Some(Stage::Aggregating));
        assert!(!episode.id.is_empty());
    }

    #[test]
    fn test_happy_path_reaches_published() {
        let mut episode = advanced_to(Stage::Publishing);
        assert_eq!(episode.next_stage(), Some(Stage::Publishing));
        episode.record_published(publish_result()).unwrap();
        assert_eq!(episode.state, EpisodeState::Published);
        assert_eq!(episode.next_stage(), None);
    }

    #[test]
    fn test_regression_is_rejected() {
        let mut episode = advanced_to(Stage::SynthesizingAudio);
        let result = episode.transition(EpisodeState::Scripting);
        assert!(matches!(
            result,
            Err(FeedcastError::InvalidTransition { .. })
        ));
        assert_eq!(episode.state, EpisodeState::SynthesizingAudio);
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let mut episode = Episode::new("daily");
        assert!(episode.transition(EpisodeState::Scripting).is_err());
    }

    #[test]
    fn test_reentering_same_stage_is_allowed() {
        // A run that died mid-stage resumes in the same state.
        let mut episode = advanced_to(Stage::Scripting);
        episode.transition(EpisodeState::Scripting).unwrap();
    }

    #[test]
    fn test_failed_episode_resumes_only_at_failed_stage() {
        let mut episode = advanced_to(Stage::SynthesizingAudio);
        episode
            .fail(
                Stage::SynthesizingAudio,
                &FeedcastError::SynthesisFailed {
                    segment: 0,
                    message: "boom".to_string(),
                },
            )
            .unwrap();
        assert!(episode.state.is_retryable());
        assert_eq!(
            episode.last_error.as_ref().map(|e| e.stage),
            Some(Stage::SynthesizingAudio)
        );
        assert!(episode.transition(EpisodeState::Scripting).is_err());
        assert!(episode.transition(EpisodeState::Publishing).is_err());
        episode.transition(EpisodeState::SynthesizingAudio).unwrap();
    }

    #[test]
    fn test_failure_must_name_running_stage() {
        let mut episode = advanced_to(Stage::Scripting);
        let result = episode.fail(Stage::Publishing, &FeedcastError::EmptyArticleSet);
        assert!(result.is_err());
    }

    #[test]
    fn test_cancelled_resumes_at_recorded_stage() {
        let mut episode = advanced_to(Stage::Scripting);
        episode.record_script(script()).unwrap();
        episode
            .transition(EpisodeState::Cancelled {
                stage: Stage::SynthesizingAudio,
            })
            .unwrap();
        assert_eq!(episode.next_stage(), Some(Stage::SynthesizingAudio));
        episode.transition(EpisodeState::SynthesizingAudio).unwrap();
    }

    #[test]
    fn test_publish_partial_only_from_publishing_and_back() {
        let mut episode = advanced_to(Stage::SynthesizingAudio);
        assert!(episode.transition(EpisodeState::PublishPartial).is_err());

        let mut episode = advanced_to(Stage::Publishing);
        let receipt = UploadReceipt {
            url: "https://example.org/a.wav".to_string(),
            remote_path: "podcasts/a.wav".to_string(),
            content_hash: "abc".to_string(),
        };
        episode.publish_partial(receipt, "index push rejected").unwrap();
        assert_eq!(episode.state, EpisodeState::PublishPartial);
        assert!(episode.upload.is_some());
        episode.transition(EpisodeState::Publishing).unwrap();
    }

    #[test]
    fn test_published_is_immutable() {
        let mut episode = advanced_to(Stage::Publishing);
        episode.record_published(publish_result()).unwrap();

        assert!(matches!(
            episode.transition(EpisodeState::Cancelled {
                stage: Stage::Publishing
            }),
            Err(FeedcastError::EpisodeImmutable { .. })
        ));
        assert!(matches!(
            episode.reset(),
            Err(FeedcastError::EpisodeImmutable { .. })
        ));
    }

    #[test]
    fn test_reset_discards_outputs() {
        let mut episode = advanced_to(Stage::Publishing);
        episode.warn(EpisodeWarning::SourcesUnavailable {
            failed: 1,
            total: 3,
        });
        episode.reset().unwrap();
        assert_eq!(episode.state, EpisodeState::Pending);
        assert!(episode.articles.is_none());
        assert!(episode.script.is_none());
        assert!(episode.audio.is_none());
        assert!(episode.warnings.is_empty());
        assert_eq!(episode.next_stage(), Some(Stage::Aggregating));
    }

    #[test]
    fn test_output_rejected_outside_its_stage() {
        let mut episode = Episode::new("daily");
        assert!(episode.record_script(script()).is_err());
    }

    #[test]
    fn test_warning_of_same_kind_is_replaced() {
        let mut episode = Episode::new("daily");
        episode.warn(EpisodeWarning::DurationMismatch {
            actual_secs: 700.0,
            target_secs: 600,
            tolerance_pct: 5.0,
        });
        episode.warn(EpisodeWarning::DurationMismatch {
            actual_secs: 660.0,
            target_secs: 600,
            tolerance_pct: 5.0,
        });
        assert_eq!(episode.warnings.len(), 1);
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let state = EpisodeState::Failed {
            stage: Stage::Scripting,
            reason: "auth".to_string(),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(
            json,
            r#"{"state":"failed","stage":"scripting","reason":"auth"}"#
        );
    }

    #[test]
    fn test_episode_roundtrips_through_json() {
        let episode = advanced_to(Stage::Publishing);
        let json = serde_json::to_string(&episode).unwrap();
        let back: Episode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, episode);
    }
}
