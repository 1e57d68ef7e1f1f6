//! Episode persistence.

use crate::error::{FeedcastError, Result};
use crate::files::write_atomic;
use crate::pipeline::episode::{Episode, EpisodeState};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Durable storage for episode records.
pub trait EpisodeStore: Send + Sync {
    /// Fails with `EpisodeNotFound` for unknown ids.
    fn load(&self, id: &str) -> Result<Episode>;

    fn save(&self, episode: &Episode) -> Result<()>;

    /// All episodes, newest first.
    fn list(&self) -> Result<Vec<Episode>>;
}

/// One JSON file per episode under a directory.
pub struct FileEpisodeStore {
    dir: PathBuf,
}

impl FileEpisodeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FeedcastError::EpisodeNotFound { id: id.to_string() });
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl EpisodeStore for FileEpisodeStore {
    fn load(&self, id: &str) -> Result<Episode> {
        let path = self.path_for(id)?;
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FeedcastError::EpisodeNotFound { id: id.to_string() });
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents).map_err(|e| FeedcastError::Store {
            message: format!("{}: {e}", path.display()),
        })
    }

    fn save(&self, episode: &Episode) -> Result<()> {
        let path = self.path_for(&episode.id)?;
        let json = serde_json::to_vec_pretty(episode).map_err(|e| FeedcastError::Store {
            message: e.to_string(),
        })?;
        write_atomic(&path, &json)
    }

    fn list(&self) -> Result<Vec<Episode>> {
        let mut episodes = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<Episode>(&s).map_err(|e| e.to_string()));
            match parsed {
                Ok(episode) => episodes.push(episode),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable episode record"),
            }
        }
        episodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(episodes)
    }
}

/// In-memory store that also records every saved state, for tests.
#[derive(Debug, Default)]
pub struct MemoryEpisodeStore {
    episodes: Mutex<HashMap<String, Episode>>,
    history: Mutex<Vec<(String, EpisodeState)>>,
}

impl MemoryEpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// States saved for `id`, in save order.
    pub fn states(&self, id: &str) -> Vec<EpisodeState> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(episode_id, _)| episode_id == id)
            .map(|(_, state)| state.clone())
            .collect()
    }

    pub fn save_count(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl EpisodeStore for MemoryEpisodeStore {
    fn load(&self, id: &str) -> Result<Episode> {
        self.episodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| FeedcastError::EpisodeNotFound { id: id.to_string() })
    }

    fn save(&self, episode: &Episode) -> Result<()> {
        self.episodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(episode.id.clone(), episode.clone());
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((episode.id.clone(), episode.state.clone()));
        Ok(())
    }

    fn list(&self) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = self
            .episodes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        episodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(episodes)
    }
}
