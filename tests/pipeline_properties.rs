//! End-to-end pipeline behaviour over mocked boundaries.

mod common;

use common::{FEED_A, FEED_B, FEED_C, Fixture, LaggingStore, SlowFeedSource, article, podcast};
use feedcast::audio::MockSpeechSynthesizer;
use feedcast::feed::{Aggregator, MockFeedSource};
use feedcast::pipeline::{Episode, EpisodeState, EpisodeWarning, ProgressReporter, Stage};
use feedcast::publish::MockHostingBackend;
use feedcast::retry::RetryPolicy;
use feedcast::script::MockTextGenerator;
use feedcast::{CallError, EpisodeStore, FeedcastError, Orchestrator};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

fn rank(state: &EpisodeState) -> usize {
    match state {
        EpisodeState::Pending => 0,
        EpisodeState::Aggregating => 1,
        EpisodeState::Scripting => 2,
        EpisodeState::SynthesizingAudio => 3,
        EpisodeState::Publishing => 4,
        EpisodeState::Published => 5,
        other => panic!("unexpected state in a clean run: {other}"),
    }
}

#[tokio::test]
async fn test_clean_run_moves_strictly_forward() {
    let fixture = Fixture::new();
    let orchestrator = Arc::new(fixture.orchestrator(podcast()));

    let episode = orchestrator.generate("daily").unwrap().wait().await.unwrap();

    assert_eq!(episode.state, EpisodeState::Published);
    let states = fixture.store.states(&episode.id);
    let ranks: Vec<usize> = states.iter().map(rank).collect();
    assert!(
        ranks.windows(2).all(|w| w[0] <= w[1]),
        "states went backwards: {states:?}"
    );
    for expected in [
        EpisodeState::Aggregating,
        EpisodeState::Scripting,
        EpisodeState::SynthesizingAudio,
        EpisodeState::Publishing,
        EpisodeState::Published,
    ] {
        assert!(states.contains(&expected), "missing {expected} in {states:?}");
    }

    let articles = episode.articles.as_ref().unwrap();
    assert_eq!(articles.articles.len(), 3);
    assert!(episode.publish.is_some());
    assert_eq!(fixture.hosting.entries().len(), 1);
}

#[tokio::test]
async fn test_resume_after_audio_failure_keeps_script() {
    let fixture = Fixture {
        speech: Arc::new(
            MockSpeechSynthesizer::new().then_fail(CallError::Permanent("voice rejected".into())),
        ),
        ..Fixture::new()
    };
    let orchestrator = Arc::new(fixture.orchestrator(podcast()));

    let failed = orchestrator.generate("daily").unwrap().wait().await.unwrap();
    assert!(
        matches!(
            failed.state,
            EpisodeState::Failed {
                stage: Stage::SynthesizingAudio,
                ..
            }
        ),
        "got {}",
        failed.state
    );
    assert!(failed.script.is_some());
    assert_eq!(fixture.generator.call_count(), 1);
    let feed_calls = fixture.feeds.call_count();

    let resumed = orchestrator.retry(&failed.id).unwrap().wait().await.unwrap();

    assert_eq!(resumed.state, EpisodeState::Published);
    assert_eq!(fixture.generator.call_count(), 1, "script was regenerated");
    assert_eq!(fixture.feeds.call_count(), feed_calls, "feeds were refetched");
    assert_eq!(resumed.script, failed.script);
}

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let fixture = Fixture::new();
    let slow = Arc::new(SlowFeedSource {
        delay: Duration::from_millis(200),
    });
    let orchestrator = Arc::new(fixture.orchestrator_with_source(podcast(), slow));
    let episode = orchestrator.create_episode("daily").unwrap();

    let first = orchestrator.start(&episode.id);
    let second = orchestrator.start(&episode.id);

    let first = first.unwrap();
    assert!(
        matches!(second, Err(FeedcastError::AlreadyRunning { .. })),
        "second start should be rejected"
    );
    assert!(orchestrator.is_podcast_running("daily"));

    let done = first.wait().await.unwrap();
    assert_eq!(done.state, EpisodeState::Published);
    assert!(!orchestrator.is_running(&episode.id));
}

#[tokio::test]
async fn test_regenerate_is_rejected_while_running() {
    let fixture = Fixture::new();
    let slow = Arc::new(SlowFeedSource {
        delay: Duration::from_millis(200),
    });
    let orchestrator = Arc::new(fixture.orchestrator_with_source(podcast(), slow));
    let run = orchestrator.generate("daily").unwrap();

    assert!(matches!(
        orchestrator.regenerate(run.episode_id()),
        Err(FeedcastError::AlreadyRunning { .. })
    ));
    assert!(matches!(
        orchestrator.retry(run.episode_id()),
        Err(FeedcastError::AlreadyRunning { .. })
    ));

    let done = run.wait().await.unwrap();
    assert_eq!(done.state, EpisodeState::Published);
    assert_eq!(fixture.generator.call_count(), 1);
}

/// Stalls the control call between reading the record and taking the run,
/// while the active run finishes and publishes.
async fn race_finishing_run(
    control: fn(&Arc<Orchestrator>, &str) -> feedcast::Result<feedcast::RunHandle>,
) -> (Fixture, Arc<LaggingStore>, Episode, feedcast::Result<()>) {
    let fixture = Fixture::new();
    let store = Arc::new(LaggingStore::new());
    let orchestrator = Arc::new(fixture.orchestrator_with_store(podcast(), store.clone()));
    let run = orchestrator.generate("daily").unwrap();
    let episode_id = run.episode_id().to_string();
    store.arm(Duration::from_millis(800));

    let racing = {
        let orchestrator = orchestrator.clone();
        tokio::task::spawn_blocking(move || control(&orchestrator, &episode_id).map(|_| ()))
    };
    let finished = run.wait().await.unwrap();
    let outcome = racing.await.unwrap();
    (fixture, store, finished, outcome)
}

fn assert_published_untouched(store: &LaggingStore, finished: &Episode) {
    let states = store.inner.states(&finished.id);
    let published_at = states
        .iter()
        .position(|s| *s == EpisodeState::Published)
        .unwrap();
    assert_eq!(published_at, states.len() - 1, "published record was rewritten: {states:?}");
    assert_eq!(store.inner.load(&finished.id).unwrap(), *finished);
}

#[tokio::test]
async fn test_regenerate_racing_a_finishing_run_leaves_it_published() {
    let (fixture, store, finished, outcome) =
        race_finishing_run(|o, id| o.regenerate(id)).await;

    assert_eq!(finished.state, EpisodeState::Published);
    assert!(
        matches!(outcome, Err(FeedcastError::EpisodeImmutable { .. })),
        "got {outcome:?}"
    );
    assert_published_untouched(&store, &finished);
    assert_eq!(fixture.generator.call_count(), 1);
    assert_eq!(fixture.hosting.upload_count(), 1);
}

#[tokio::test]
async fn test_retry_racing_a_finishing_run_repeats_nothing() {
    let (fixture, store, finished, outcome) = race_finishing_run(|o, id| o.retry(id)).await;

    assert!(
        matches!(outcome, Err(FeedcastError::EpisodeImmutable { .. })),
        "got {outcome:?}"
    );
    assert_published_untouched(&store, &finished);
    assert_eq!(fixture.feeds.call_count(), 2);
    assert_eq!(fixture.generator.call_count(), 1);
}

#[tokio::test]
async fn test_one_unreachable_source_of_three() {
    let source = Arc::new(
        MockFeedSource::new()
            .with_feed(FEED_A, vec![article(FEED_A, "a1", 5)])
            .with_feed(FEED_B, vec![article(FEED_B, "b1", 15)])
            .with_failure(FEED_C, CallError::Transient("connection refused".into())),
    );
    let aggregator = Aggregator::new(source, RetryPolicy::immediate(2), Duration::from_secs(1));
    let urls = [FEED_A, FEED_B, FEED_C].map(String::from);

    let set = aggregator
        .fetch(&urls, chrono::Utc::now() - chrono::Duration::hours(1), 10)
        .await
        .unwrap();

    assert_eq!(set.failed_sources, 1);
    assert_eq!(set.articles.len(), 2);
    assert_eq!(set.articles[0].url, format!("{FEED_A}/a1"));
}

#[tokio::test]
async fn test_no_reachable_source_fails_aggregation() {
    let source = Arc::new(
        MockFeedSource::new()
            .with_failure(FEED_A, CallError::Permanent("404".into()))
            .with_failure(FEED_B, CallError::Transient("reset".into())),
    );
    let fixture = Fixture::new();
    let orchestrator = Arc::new(fixture.orchestrator_with_source(podcast(), source));

    let episode = orchestrator.generate("daily").unwrap().wait().await.unwrap();

    match &episode.state {
        EpisodeState::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Aggregating);
            assert!(reason.contains("No content available"), "got: {reason}");
        }
        other => panic!("expected failure, got {other}"),
    }
    assert_eq!(fixture.generator.call_count(), 0);
}

#[tokio::test]
async fn test_duration_outside_tolerance_warns_but_publishes() {
    let fixture = Fixture {
        generator: Arc::new(MockTextGenerator::new().with_response("A short show.")),
        speech: Arc::new(MockSpeechSynthesizer::new().with_duration(11.0)),
        ..Fixture::new()
    };
    let podcast = feedcast::PodcastConfig {
        target_duration_seconds: 10,
        duration_tolerance_pct: 5.0,
        ..podcast()
    };
    let orchestrator = Arc::new(fixture.orchestrator(podcast));

    let episode = orchestrator.generate("daily").unwrap().wait().await.unwrap();

    assert_eq!(episode.state, EpisodeState::Published);
    assert!(
        episode
            .warnings
            .iter()
            .any(|w| matches!(w, EpisodeWarning::DurationMismatch { target_secs: 10, .. })),
        "warnings: {:?}",
        episode.warnings
    );
}

#[tokio::test]
async fn test_index_failure_is_partial_and_retry_skips_upload() {
    let fixture = Fixture {
        hosting: Arc::new(MockHostingBackend::new().with_index_failures(1)),
        ..Fixture::new()
    };
    let orchestrator = Arc::new(fixture.orchestrator(podcast()));

    let partial = orchestrator.generate("daily").unwrap().wait().await.unwrap();
    assert_eq!(partial.state, EpisodeState::PublishPartial);
    let receipt = partial.upload.clone().unwrap();
    assert_eq!(fixture.hosting.upload_count(), 1);

    let published = orchestrator.retry(&partial.id).unwrap().wait().await.unwrap();

    assert_eq!(published.state, EpisodeState::Published);
    assert_eq!(fixture.hosting.upload_count(), 1, "audio uploaded twice");
    assert_eq!(fixture.hosting.index_update_count(), 2);
    assert_eq!(published.publish.as_ref().unwrap().url, receipt.url);
}

/// Cancels the run as soon as a chosen stage completes.
struct CancelAfter {
    stage: Stage,
    orchestrator: OnceLock<Weak<Orchestrator>>,
}

impl ProgressReporter for CancelAfter {
    fn stage_started(&self, _episode: &Episode, _stage: Stage) {}

    fn stage_completed(&self, episode: &Episode, stage: Stage, _elapsed: Duration) {
        if stage != self.stage {
            return;
        }
        if let Some(orchestrator) = self.orchestrator.get().and_then(Weak::upgrade) {
            orchestrator.cancel(&episode.id).unwrap();
        }
    }

    fn run_finished(&self, _episode: &Episode) {}
}

#[tokio::test]
async fn test_cancel_between_script_and_audio_then_resume() {
    let fixture = Fixture::new();
    let reporter = Arc::new(CancelAfter {
        stage: Stage::Scripting,
        orchestrator: OnceLock::new(),
    });
    let orchestrator = Arc::new(
        fixture
            .orchestrator(podcast())
            .with_reporter(reporter.clone()),
    );
    reporter
        .orchestrator
        .set(Arc::downgrade(&orchestrator))
        .unwrap();

    let cancelled = orchestrator.generate("daily").unwrap().wait().await.unwrap();
    assert_eq!(
        cancelled.state,
        EpisodeState::Cancelled {
            stage: Stage::SynthesizingAudio
        }
    );
    assert!(cancelled.script.is_some());
    assert_eq!(fixture.speech.call_count(), 0);
    assert_eq!(orchestrator.status(&cancelled.id).unwrap(), cancelled);

    // Scripting is already done, so the reporter does not fire again.
    let resumed = orchestrator.retry(&cancelled.id).unwrap().wait().await.unwrap();

    assert_eq!(resumed.state, EpisodeState::Published);
    assert_eq!(fixture.generator.call_count(), 1);
    assert!(fixture.speech.call_count() > 0);
}

#[tokio::test]
async fn test_stage_ceiling_fails_the_stage() {
    let fixture = Fixture::new();
    let slow = Arc::new(SlowFeedSource {
        delay: Duration::from_secs(2),
    });
    let orchestrator = Arc::new(
        fixture
            .orchestrator_with_source(podcast(), slow)
            .with_stage_timeout(Duration::from_millis(50)),
    );

    let episode = orchestrator.generate("daily").unwrap().wait().await.unwrap();

    match &episode.state {
        EpisodeState::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Aggregating);
            assert!(reason.contains("timed out"), "got: {reason}");
        }
        other => panic!("expected timeout failure, got {other}"),
    }
}

#[tokio::test]
async fn test_published_episode_cannot_be_rerun() {
    let fixture = Fixture::new();
    let orchestrator = Arc::new(fixture.orchestrator(podcast()));
    let episode = orchestrator.generate("daily").unwrap().wait().await.unwrap();

    assert!(matches!(
        orchestrator.retry(&episode.id),
        Err(FeedcastError::EpisodeImmutable { .. })
    ));
    assert!(matches!(
        orchestrator.regenerate(&episode.id),
        Err(FeedcastError::EpisodeImmutable { .. })
    ));
    assert!(matches!(
        orchestrator.start(&episode.id),
        Err(FeedcastError::EpisodeImmutable { .. })
    ));
}
