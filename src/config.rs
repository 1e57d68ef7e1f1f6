use crate::defaults;
use crate::error::{FeedcastError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub generation: GenerationConfig,
    pub speech: SpeechConfig,
    pub publish: PublishConfig,
    pub retry: RetryPolicy,
    pub timeouts: TimeoutConfig,
    pub podcasts: Vec<PodcastConfig>,
}

/// Daemon process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket for dashboard commands (default: $XDG_RUNTIME_DIR/feedcast.sock)
    pub socket: Option<PathBuf>,
    /// Episode records and audio (default: ~/.local/share/feedcast)
    pub data_dir: Option<PathBuf>,
}

/// Text-generation API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub api_base: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub max_prompt_chars: usize,
    pub max_article_chars: usize,
}

/// Text-to-speech API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechConfig {
    pub api_base: String,
    pub model: String,
    pub api_key_env: String,
    pub default_voice: String,
    pub segment_gap_ms: u32,
    pub max_segment_chars: usize,
}

/// Publication credentials and commit identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishConfig {
    /// Name of the environment variable holding the push token
    pub token_env: String,
    pub committer_name: String,
    pub committer_email: String,
}

/// Deadlines, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per feed request
    pub feed_fetch_secs: u64,
    /// Per generation attempt
    pub generation_secs: u64,
    /// Per speech attempt (one segment)
    pub speech_secs: u64,
    /// Per publish step attempt
    pub publish_secs: u64,
    /// Ceiling for a whole stage, retries included
    pub stage_secs: u64,
}

/// One podcast: its sources, voice, duration target and publication target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PodcastConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub author: String,
    pub language: String,
    pub category: String,
    pub explicit: bool,
    pub feed_urls: Vec<String>,
    pub voice: VoiceSettings,
    pub target_duration_seconds: u32,
    pub duration_tolerance_pct: f32,
    pub publish: PublishTarget,
    /// Replaces the default system prompt when set
    pub instructions: Option<String>,
    /// How far back to take feed entries, e.g. "1day", "7days"
    pub lookback: String,
    /// Articles used for the script; derived from the duration when unset
    pub max_articles: Option<usize>,
    pub max_articles_per_feed: usize,
    /// Daily generation time, "HH:MM" in UTC
    pub schedule: Option<String>,
}

/// Voice parameters for speech synthesis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct VoiceSettings {
    /// Podcast default voice; falls back to `speech.default_voice`
    pub voice: Option<String>,
    pub speed: Option<f32>,
    /// Script speaker tag → voice
    pub speakers: BTreeMap<String, String>,
}

/// Where a podcast is published
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishTarget {
    /// Local repository (or plain directory) holding the static site
    pub repository: PathBuf,
    /// Git remote to push to after committing; no push when unset
    pub remote: Option<String>,
    pub branch: String,
    /// Public URL the repository is served from
    pub base_url: String,
    pub audio_dir: String,
    pub index_file: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::API_BASE.to_string(),
            model: defaults::GENERATION_MODEL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.7,
            max_prompt_chars: defaults::MAX_PROMPT_CHARS,
            max_article_chars: defaults::MAX_ARTICLE_CHARS,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::API_BASE.to_string(),
            model: defaults::SPEECH_MODEL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            default_voice: defaults::VOICE.to_string(),
            segment_gap_ms: defaults::SEGMENT_GAP_MS,
            max_segment_chars: defaults::MAX_SEGMENT_CHARS,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            token_env: "FEEDCAST_PUBLISH_TOKEN".to_string(),
            committer_name: "feedcast".to_string(),
            committer_email: "feedcast@localhost".to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            feed_fetch_secs: 30,
            generation_secs: 180,
            speech_secs: 120,
            publish_secs: 120,
            stage_secs: 3600,
        }
    }
}

impl Default for PodcastConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            author: String::new(),
            language: "en-us".to_string(),
            category: "Technology".to_string(),
            explicit: false,
            feed_urls: Vec::new(),
            voice: VoiceSettings::default(),
            target_duration_seconds: defaults::TARGET_DURATION_SECS,
            duration_tolerance_pct: defaults::DURATION_TOLERANCE_PCT,
            publish: PublishTarget::default(),
            instructions: None,
            lookback: defaults::LOOKBACK.to_string(),
            max_articles: None,
            max_articles_per_feed: defaults::MAX_ARTICLES_PER_FEED,
            schedule: None,
        }
    }
}

impl Default for PublishTarget {
    fn default() -> Self {
        Self {
            repository: PathBuf::from("site"),
            remote: None,
            branch: "main".to_string(),
            base_url: "http://localhost".to_string(),
            audio_dir: defaults::AUDIO_DIR.to_string(),
            index_file: defaults::INDEX_FILE.to_string(),
        }
    }
}

impl TimeoutConfig {
    pub fn feed_fetch(&self) -> Duration {
        Duration::from_secs(self.feed_fetch_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn speech(&self) -> Duration {
        Duration::from_secs(self.speech_secs)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }

    pub fn stage(&self) -> Duration {
        Duration::from_secs(self.stage_secs)
    }
}

impl PodcastConfig {
    /// Parsed lookback window.
    pub fn lookback(&self) -> Result<Duration> {
        humantime::parse_duration(self.lookback.trim()).map_err(|e| {
            FeedcastError::ConfigInvalidValue {
                key: format!("podcasts.{}.lookback", self.id),
                message: e.to_string(),
            }
        })
    }

    /// Number of articles the script is built from.
    pub fn article_limit(&self) -> usize {
        self.max_articles
            .unwrap_or_else(|| defaults::article_budget(self.target_duration_seconds))
    }

    /// Parsed daily schedule as (hour, minute).
    pub fn schedule_time(&self) -> Result<Option<(u32, u32)>> {
        let Some(raw) = self.schedule.as_deref() else {
            return Ok(None);
        };
        let invalid = || FeedcastError::ConfigInvalidValue {
            key: format!("podcasts.{}.schedule", self.id),
            message: format!("expected HH:MM, got '{raw}'"),
        };
        let (hour, minute) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Some((hour, minute)))
    }
}

/// Read-only access to podcast configuration.
pub trait ConfigStore: Send + Sync {
    /// Look up one podcast by id.
    fn podcast(&self, id: &str) -> Result<PodcastConfig>;

    /// All configured podcasts.
    fn podcasts(&self) -> Vec<PodcastConfig>;
}

impl ConfigStore for Config {
    fn podcast(&self, id: &str) -> Result<PodcastConfig> {
        self.podcasts
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| FeedcastError::PodcastNotFound { id: id.to_string() })
    }

    fn podcasts(&self) -> Vec<PodcastConfig> {
        self.podcasts.clone()
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Fails with `ConfigFileNotFound` when the file is missing and
    /// `ConfigParse` when it is not valid TOML. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FeedcastError::ConfigFileNotFound {
                path: path.display().to_string(),
            },
            _ => FeedcastError::Io(e),
        })?;
        toml::from_str(&contents).map_err(|e| FeedcastError::ConfigParse {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(FeedcastError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            result => result,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - FEEDCAST_DATA_DIR → daemon.data_dir
    /// - FEEDCAST_SOCKET → daemon.socket
    /// - FEEDCAST_GENERATION_MODEL → generation.model
    /// - FEEDCAST_SPEECH_MODEL → speech.model
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("FEEDCAST_DATA_DIR")
            && !dir.is_empty()
        {
            self.daemon.data_dir = Some(PathBuf::from(dir));
        }

        if let Ok(socket) = std::env::var("FEEDCAST_SOCKET")
            && !socket.is_empty()
        {
            self.daemon.socket = Some(PathBuf::from(socket));
        }

        if let Ok(model) = std::env::var("FEEDCAST_GENERATION_MODEL")
            && !model.is_empty()
        {
            self.generation.model = model;
        }

        if let Ok(model) = std::env::var("FEEDCAST_SPEECH_MODEL")
            && !model.is_empty()
        {
            self.speech.model = model;
        }

        self
    }

    /// Check values serde cannot: ids, URLs, ranges, durations, schedules.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for (index, podcast) in self.podcasts.iter().enumerate() {
            let invalid = |field: &str, message: &str| FeedcastError::ConfigInvalidValue {
                key: format!("podcasts[{index}].{field}"),
                message: message.to_string(),
            };
            if podcast.id.trim().is_empty() {
                return Err(invalid("id", "must not be empty"));
            }
            if !seen.insert(podcast.id.as_str()) {
                return Err(invalid("id", "duplicate podcast id"));
            }
            if podcast.feed_urls.is_empty() {
                return Err(invalid("feed_urls", "must list at least one feed"));
            }
            if podcast.target_duration_seconds == 0 {
                return Err(invalid("target_duration_seconds", "must be positive"));
            }
            if podcast.target_duration_seconds > defaults::MAX_TARGET_DURATION_SECS {
                return Err(invalid(
                    "target_duration_seconds",
                    &format!("must be at most {}", defaults::MAX_TARGET_DURATION_SECS),
                ));
            }
            if !(0.0..=100.0).contains(&podcast.duration_tolerance_pct) {
                return Err(invalid("duration_tolerance_pct", "must be within 0..=100"));
            }
            if podcast.max_articles_per_feed == 0 {
                return Err(invalid("max_articles_per_feed", "must be positive"));
            }
            podcast.lookback()?;
            podcast.schedule_time()?;
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/feedcast/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("feedcast")
            .join("config.toml")
    }

    /// Directory for episode records and audio.
    pub fn data_dir(&self) -> PathBuf {
        self.daemon.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from(".local/share"))
                .join("feedcast")
        })
    }
}
