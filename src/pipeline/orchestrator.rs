//! Drives episodes through aggregation, scripting, audio and publishing.
//!
//! The orchestrator is the only writer of episode records. Each run owns its
//! episode for its whole duration; a per-episode guard rejects a second run
//! instead of queueing it. The record is persisted after every transition,
//! and the stage to run is derived from the persisted outputs, so retrying a
//! failed, cancelled or interrupted episode never repeats a completed stage.

use crate::audio::{AudioSynthesizer, OpenAiSpeech};
use crate::config::{Config, ConfigStore, PodcastConfig};
use crate::error::{FeedcastError, Result};
use crate::feed::{Aggregator, HttpFeedSource};
use crate::pipeline::episode::{Episode, EpisodeState, EpisodeWarning, Stage};
use crate::pipeline::progress::{LogReporter, ProgressReporter};
use crate::pipeline::store::EpisodeStore;
use crate::publish::{Publisher, RepositoryBackend, metadata_for};
use crate::script::{OpenAiGenerator, PromptBuilder, ScriptSynthesizer};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The four stage implementations.
pub struct Stages {
    pub aggregator: Aggregator,
    pub script: ScriptSynthesizer,
    pub audio: AudioSynthesizer,
    pub publisher: Publisher,
}

impl Stages {
    /// Production stages: HTTP feeds, OpenAI-compatible generation and
    /// speech, and a repository publication target.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeouts = &config.timeouts;
        let aggregator = Aggregator::new(
            Arc::new(HttpFeedSource::new(timeouts.feed_fetch())),
            config.retry,
            timeouts.feed_fetch(),
        );
        let script = ScriptSynthesizer::new(
            Arc::new(OpenAiGenerator::from_config(
                &config.generation,
                timeouts.generation(),
            )?),
            config.retry,
            timeouts.generation(),
        )
        .with_prompt_builder(PromptBuilder {
            max_prompt_chars: config.generation.max_prompt_chars,
            max_article_chars: config.generation.max_article_chars,
        })
        .with_max_segment_chars(config.speech.max_segment_chars);
        let audio = AudioSynthesizer::new(
            Arc::new(OpenAiSpeech::from_config(&config.speech, timeouts.speech())?),
            config.retry,
            timeouts.speech(),
        )
        .with_default_voice(&config.speech.default_voice)
        .with_gap_ms(config.speech.segment_gap_ms);
        let publisher = Publisher::new(
            Arc::new(RepositoryBackend::new(config.publish.clone())),
            config.retry,
            timeouts.publish(),
        );
        Ok(Self {
            aggregator,
            script,
            audio,
            publisher,
        })
    }
}

/// Bookkeeping for one active run.
struct ActiveRun {
    podcast_id: String,
    cancel: Arc<AtomicBool>,
}

/// Removes the episode from the active set when the run ends, however it ends.
struct RunGuard {
    orchestrator: Arc<Orchestrator>,
    episode_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.orchestrator
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.episode_id);
    }
}

/// Handle to a spawned run.
pub struct RunHandle {
    episode_id: String,
    join: JoinHandle<Result<Episode>>,
}

impl RunHandle {
    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    /// Wait for the run to stop and return the final record.
    pub async fn wait(self) -> Result<Episode> {
        self.join
            .await
            .map_err(|e| FeedcastError::Other(format!("run task failed: {e}")))?
    }
}

pub struct Orchestrator {
    configs: Arc<dyn ConfigStore>,
    store: Arc<dyn EpisodeStore>,
    stages: Stages,
    reporter: Arc<dyn ProgressReporter>,
    work_dir: PathBuf,
    stage_timeout: Duration,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl Orchestrator {
    /// `work_dir` holds synthesized audio and the per-segment chunk cache.
    pub fn new(
        configs: Arc<dyn ConfigStore>,
        store: Arc<dyn EpisodeStore>,
        stages: Stages,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            configs,
            store,
            stages,
            reporter: Arc::new(LogReporter),
            work_dir: work_dir.into(),
            stage_timeout: Duration::from_secs(3600),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Ceiling on one stage, retries included.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Create and persist a pending episode.
    pub fn create_episode(&self, podcast_id: &str) -> Result<Episode> {
        self.configs.podcast(podcast_id)?;
        let episode = Episode::new(podcast_id);
        self.store.save(&episode)?;
        info!(episode_id = %episode.id, podcast_id, "Episode created");
        Ok(episode)
    }

    /// Create an episode and start its run.
    pub fn generate(self: &Arc<Self>, podcast_id: &str) -> Result<RunHandle> {
        let episode = self.create_episode(podcast_id)?;
        self.start(&episode.id)
    }

    /// Start (or resume) a run for an existing episode.
    ///
    /// Fails with `AlreadyRunning` while another run holds the episode.
    pub fn start(self: &Arc<Self>, episode_id: &str) -> Result<RunHandle> {
        let (episode, guard, cancel) = self.claim(episode_id)?;
        if episode.is_published() {
            return Err(FeedcastError::EpisodeImmutable {
                id: episode.id.clone(),
            });
        }
        Ok(self.spawn(episode, guard, cancel))
    }

    /// Resume a failed, cancelled, partially published or interrupted
    /// episode at its first incomplete stage.
    pub fn retry(self: &Arc<Self>, episode_id: &str) -> Result<RunHandle> {
        let (episode, guard, cancel) = self.claim(episode_id)?;
        if episode.is_published() {
            return Err(FeedcastError::EpisodeImmutable {
                id: episode.id.clone(),
            });
        }
        // The record was read under the guard, so an in-progress state means
        // a dead process.
        if !episode.state.is_retryable() && !episode.state.is_in_progress() {
            return Err(FeedcastError::NothingToRetry {
                id: episode.id.clone(),
                state: episode.state.to_string(),
            });
        }
        info!(episode_id, state = %episode.state, "Retrying episode");
        Ok(self.spawn(episode, guard, cancel))
    }

    /// Discard all stage outputs and run the episode from the beginning.
    pub fn regenerate(self: &Arc<Self>, episode_id: &str) -> Result<RunHandle> {
        let (mut episode, guard, cancel) = self.claim(episode_id)?;
        episode.reset()?;
        self.store.save(&episode)?;
        info!(episode_id, "Episode reset for regeneration");
        Ok(self.spawn(episode, guard, cancel))
    }

    /// Ask an active run to stop at its next stage boundary.
    pub fn cancel(&self, episode_id: &str) -> Result<()> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let run = active
            .get(episode_id)
            .ok_or_else(|| FeedcastError::NotRunning {
                id: episode_id.to_string(),
            })?;
        run.cancel.store(true, Ordering::SeqCst);
        info!(episode_id, "Cancellation requested");
        Ok(())
    }

    pub fn status(&self, episode_id: &str) -> Result<Episode> {
        self.store.load(episode_id)
    }

    /// Episodes newest first, optionally for one podcast.
    pub fn list(&self, podcast_id: Option<&str>) -> Result<Vec<Episode>> {
        let mut episodes = self.store.list()?;
        if let Some(podcast_id) = podcast_id {
            episodes.retain(|e| e.podcast_id == podcast_id);
        }
        Ok(episodes)
    }

    pub fn is_running(&self, episode_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(episode_id)
    }

    /// Whether any episode of `podcast_id` has an active run.
    pub fn is_podcast_running(&self, podcast_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|run| run.podcast_id == podcast_id)
    }

    /// Episodes persisted mid-stage with no active run: left behind by a
    /// process that died. They resume with [`Orchestrator::retry`].
    pub fn interrupted(&self) -> Result<Vec<Episode>> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|e| e.state.is_in_progress() && !active.contains_key(&e.id))
            .collect())
    }

    /// Take the run guard for `episode_id`, then read the record under it.
    ///
    /// A run that ended before the guard was taken has already saved its
    /// final record, so checks against the returned episode see it.
    fn claim(self: &Arc<Self>, episode_id: &str) -> Result<(Episode, RunGuard, Arc<AtomicBool>)> {
        let podcast_id = self.store.load(episode_id)?.podcast_id;
        let (guard, cancel) = self.acquire(episode_id, &podcast_id)?;
        let episode = self.store.load(episode_id)?;
        Ok((episode, guard, cancel))
    }

    fn acquire(self: &Arc<Self>, episode_id: &str, podcast_id: &str) -> Result<(RunGuard, Arc<AtomicBool>)> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.contains_key(episode_id) {
            return Err(FeedcastError::AlreadyRunning {
                id: episode_id.to_string(),
            });
        }
        let cancel = Arc::new(AtomicBool::new(false));
        active.insert(
            episode_id.to_string(),
            ActiveRun {
                podcast_id: podcast_id.to_string(),
                cancel: cancel.clone(),
            },
        );
        let guard = RunGuard {
            orchestrator: self.clone(),
            episode_id: episode_id.to_string(),
        };
        Ok((guard, cancel))
    }

    fn spawn(self: &Arc<Self>, episode: Episode, guard: RunGuard, cancel: Arc<AtomicBool>) -> RunHandle {
        let episode_id = episode.id.clone();
        let this = self.clone();
        let join = tokio::spawn(async move {
            let _guard = guard;
            this.execute(episode, &cancel).await
        });
        RunHandle { episode_id, join }
    }

    /// Run stages until the episode is published, a stage fails or the run
    /// is cancelled. Stage failures end in a persisted `Failed` record, not
    /// an `Err`; errors are reserved for persistence and bookkeeping faults.
    async fn execute(&self, mut episode: Episode, cancel: &AtomicBool) -> Result<Episode> {
        let podcast = self.configs.podcast(&episode.podcast_id)?;

        while let Some(stage) = episode.next_stage() {
            if cancel.load(Ordering::SeqCst) {
                episode.transition(EpisodeState::Cancelled { stage })?;
                self.store.save(&episode)?;
                info!(episode_id = %episode.id, next = %stage, "Run cancelled");
                self.reporter.run_finished(&episode);
                return Ok(episode);
            }

            episode.transition(stage.state())?;
            self.store.save(&episode)?;
            self.reporter.stage_started(&episode, stage);

            let started = Instant::now();
            let outcome = tokio::time::timeout(
                self.stage_timeout,
                self.run_stage(stage, &mut episode, &podcast),
            )
            .await
            .unwrap_or(Err(FeedcastError::Timeout {
                stage,
                after: self.stage_timeout,
            }));

            match outcome {
                Ok(()) => {
                    self.store.save(&episode)?;
                    self.reporter
                        .stage_completed(&episode, stage, started.elapsed());
                }
                Err(error) => {
                    match (&error, episode.upload.clone()) {
                        (FeedcastError::PublishPartial { .. }, Some(receipt)) => {
                            episode.publish_partial(receipt, &error.to_string())?
                        }
                        _ => episode.fail(stage, &error)?,
                    }
                    self.store.save(&episode)?;
                    self.reporter.run_finished(&episode);
                    return Ok(episode);
                }
            }
        }

        self.reporter.run_finished(&episode);
        Ok(episode)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        episode: &mut Episode,
        podcast: &PodcastConfig,
    ) -> Result<()> {
        match stage {
            Stage::Aggregating => self.aggregate(episode, podcast).await,
            Stage::Scripting => {
                let articles = episode
                    .articles
                    .as_ref()
                    .ok_or_else(|| missing_output(episode, "articles"))?;
                let script = self
                    .stages
                    .script
                    .synthesize(&articles.articles, podcast)
                    .await?;
                episode.record_script(script)
            }
            Stage::SynthesizingAudio => self.synthesize_audio(episode, podcast).await,
            Stage::Publishing => self.publish(episode, podcast).await,
        }
    }

    async fn aggregate(&self, episode: &mut Episode, podcast: &PodcastConfig) -> Result<()> {
        let lookback = chrono::Duration::from_std(podcast.lookback()?).map_err(|e| {
            FeedcastError::ConfigInvalidValue {
                key: format!("podcasts.{}.lookback", podcast.id),
                message: e.to_string(),
            }
        })?;
        let articles = self
            .stages
            .aggregator
            .clone()
            .with_per_feed_limit(podcast.max_articles_per_feed)
            .fetch(&podcast.feed_urls, Utc::now() - lookback, podcast.article_limit())
            .await?;

        if articles.failed_sources > 0 {
            episode.warn(EpisodeWarning::SourcesUnavailable {
                failed: articles.failed_sources,
                total: podcast.feed_urls.len(),
            });
        }
        episode.record_articles(articles)
    }

    async fn synthesize_audio(&self, episode: &mut Episode, podcast: &PodcastConfig) -> Result<()> {
        let script = episode
            .script
            .as_ref()
            .ok_or_else(|| missing_output(episode, "script"))?;
        let output = self.audio_path(&episode.id);
        let cache_dir = self.cache_dir(&episode.id);
        let synthesized = self
            .stages
            .audio
            .synthesize(script, podcast, &output, &cache_dir)
            .await?;

        if let Some(warning) = synthesized.warning {
            warn!(episode_id = %episode.id, %warning, "Audio duration outside tolerance");
            episode.warn(warning);
        }
        episode.record_audio(synthesized.artifact)?;

        if let Err(e) = std::fs::remove_dir_all(&cache_dir) {
            debug!(path = %cache_dir.display(), error = %e, "Chunk cache not removed");
        }
        Ok(())
    }

    async fn publish(&self, episode: &mut Episode, podcast: &PodcastConfig) -> Result<()> {
        let script = episode
            .script
            .as_ref()
            .ok_or_else(|| missing_output(episode, "script"))?;
        let audio = episode
            .audio
            .clone()
            .ok_or_else(|| missing_output(episode, "audio"))?;
        let metadata = metadata_for(episode, script, &audio, podcast);
        let publisher = &self.stages.publisher;

        let receipt = publisher
            .upload(&audio, &metadata, podcast, episode.upload.as_ref())
            .await?;
        if episode.upload.as_ref() != Some(&receipt) {
            episode.record_upload(receipt.clone())?;
            self.store.save(episode)?;
        }

        let result = publisher
            .update_index(&receipt, &audio, &metadata, podcast)
            .await?;
        episode.record_published(result)
    }

    fn audio_path(&self, episode_id: &str) -> PathBuf {
        self.work_dir.join("audio").join(format!("{episode_id}.wav"))
    }

    fn cache_dir(&self, episode_id: &str) -> PathBuf {
        self.work_dir.join("cache").join(episode_id)
    }
}

fn missing_output(episode: &Episode, output: &str) -> FeedcastError {
    FeedcastError::InvalidTransition {
        from: episode.state.to_string(),
        to: format!("a stage that needs {output}"),
    }
}
