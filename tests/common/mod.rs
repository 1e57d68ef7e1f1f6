//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use feedcast::audio::{AudioSynthesizer, MockSpeechSynthesizer};
use feedcast::config::{Config, PodcastConfig};
use feedcast::feed::{Aggregator, FeedSource, MockFeedSource};
use feedcast::pipeline::types::Article;
use feedcast::pipeline::{Episode, EpisodeStore, MemoryEpisodeStore, Orchestrator, Stages};
use feedcast::publish::{MockHostingBackend, Publisher};
use feedcast::retry::RetryPolicy;
use feedcast::script::{MockTextGenerator, ScriptSynthesizer};
use feedcast::CallError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const FEED_A: &str = "https://a.example/rss";
pub const FEED_B: &str = "https://b.example/rss";
pub const FEED_C: &str = "https://c.example/rss";

pub fn article(source: &str, slug: &str, minutes_ago: i64) -> Article {
    Article {
        source: source.to_string(),
        source_title: source.to_string(),
        title: format!("Story {slug}"),
        body: format!("Details about {slug}."),
        published_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        url: format!("{source}/{slug}"),
    }
}

pub fn podcast() -> PodcastConfig {
    PodcastConfig {
        id: "daily".to_string(),
        name: "Daily".to_string(),
        feed_urls: vec![FEED_A.to_string(), FEED_B.to_string()],
        target_duration_seconds: 10,
        duration_tolerance_pct: 100.0,
        ..Default::default()
    }
}

pub fn feeds() -> MockFeedSource {
    MockFeedSource::new()
        .with_feed(FEED_A, vec![article(FEED_A, "a1", 5), article(FEED_A, "a2", 50)])
        .with_feed(FEED_B, vec![article(FEED_B, "b1", 10)])
}

/// Mocks for every boundary plus an in-memory store.
pub struct Fixture {
    pub feeds: Arc<MockFeedSource>,
    pub generator: Arc<MockTextGenerator>,
    pub speech: Arc<MockSpeechSynthesizer>,
    pub hosting: Arc<MockHostingBackend>,
    pub store: Arc<MemoryEpisodeStore>,
    pub retry: RetryPolicy,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            feeds: Arc::new(feeds()),
            generator: Arc::new(MockTextGenerator::new()),
            speech: Arc::new(MockSpeechSynthesizer::new()),
            hosting: Arc::new(MockHostingBackend::new()),
            store: Arc::new(MemoryEpisodeStore::new()),
            retry: RetryPolicy::immediate(1),
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn stages_with_source(&self, source: Arc<dyn FeedSource>) -> Stages {
        let timeout = Duration::from_secs(5);
        Stages {
            aggregator: Aggregator::new(source, self.retry, timeout),
            script: ScriptSynthesizer::new(self.generator.clone(), self.retry, timeout),
            audio: AudioSynthesizer::new(self.speech.clone(), self.retry, timeout).with_gap_ms(0),
            publisher: Publisher::new(self.hosting.clone(), self.retry, timeout),
        }
    }

    /// Orchestrator over this fixture's mocks, not yet shared.
    pub fn orchestrator(&self, podcast: PodcastConfig) -> Orchestrator {
        self.orchestrator_with_source(podcast, self.feeds.clone())
    }

    /// Orchestrator over this fixture's mocks and a caller-supplied store.
    pub fn orchestrator_with_store(
        &self,
        podcast: PodcastConfig,
        store: Arc<dyn EpisodeStore>,
    ) -> Orchestrator {
        let config = Config {
            podcasts: vec![podcast],
            ..Default::default()
        };
        Orchestrator::new(
            Arc::new(config),
            store,
            self.stages_with_source(self.feeds.clone()),
            self.dir.path(),
        )
    }

    pub fn orchestrator_with_source(
        &self,
        podcast: PodcastConfig,
        source: Arc<dyn FeedSource>,
    ) -> Orchestrator {
        let config = Config {
            podcasts: vec![podcast],
            ..Default::default()
        };
        Orchestrator::new(
            Arc::new(config),
            self.store.clone(),
            self.stages_with_source(source),
            self.dir.path(),
        )
    }
}

/// Feed source that answers only after a delay.
pub struct SlowFeedSource {
    pub delay: Duration,
}

#[async_trait]
impl FeedSource for SlowFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<Article>, CallError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![article(url, "slow", 1)])
    }
}

/// Store whose reads stall after fetching the record, once armed.
///
/// Widens the gap between a caller reading an episode and acting on it.
pub struct LaggingStore {
    pub inner: MemoryEpisodeStore,
    lag: Mutex<Option<Duration>>,
}

impl LaggingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryEpisodeStore::new(),
            lag: Mutex::new(None),
        }
    }

    pub fn arm(&self, lag: Duration) {
        *self.lag.lock().unwrap() = Some(lag);
    }
}

impl EpisodeStore for LaggingStore {
    fn load(&self, id: &str) -> feedcast::Result<Episode> {
        let episode = self.inner.load(id);
        let lag = *self.lag.lock().unwrap();
        if let Some(lag) = lag {
            std::thread::sleep(lag);
        }
        episode
    }

    fn save(&self, episode: &Episode) -> feedcast::Result<()> {
        self.inner.save(episode)
    }

    fn list(&self) -> feedcast::Result<Vec<Episode>> {
        self.inner.list()
    }
}
