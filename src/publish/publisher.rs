//! Publishing stage: upload, then index.

use crate::config::PodcastConfig;
use crate::defaults;
use crate::error::{FeedcastError, Result};
use crate::pipeline::episode::Episode;
use crate::pipeline::types::{AudioArtifact, EpisodeMetadata, PublishResult, Script, UploadReceipt};
use crate::publish::backend::{HostingBackend, UploadRequest};
use crate::publish::index::IndexEntry;
use crate::retry::{RetryPolicy, with_retry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Publisher {
    backend: Arc<dyn HostingBackend>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl Publisher {
    pub fn new(backend: Arc<dyn HostingBackend>, retry: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            backend,
            retry,
            attempt_timeout,
        }
    }

    /// Upload the audio unless `prior` already covers the same content.
    ///
    /// Fails with `PublishFailed`.
    pub async fn upload(
        &self,
        artifact: &AudioArtifact,
        metadata: &EpisodeMetadata,
        podcast: &PodcastConfig,
        prior: Option<&UploadReceipt>,
    ) -> Result<UploadReceipt> {
        if let Some(receipt) = prior
            && receipt.content_hash == artifact.content_hash
        {
            info!(url = %receipt.url, "Audio already uploaded, skipping");
            return Ok(receipt.clone());
        }

        let request = UploadRequest {
            local_path: artifact.path.clone(),
            remote_path: remote_path(podcast, metadata),
            content_hash: artifact.content_hash.clone(),
            title: metadata.title.clone(),
        };
        let target = &podcast.publish;
        let backend = &self.backend;
        let request = &request;
        with_retry(&self.retry, self.attempt_timeout, "upload", || async move {
            backend.upload_artifact(target, request).await
        })
        .await
        .map_err(|e| FeedcastError::PublishFailed {
            message: e.describe(),
        })
    }

    /// Insert the episode into the public index.
    ///
    /// Fails with `PublishPartial`: the upload in `receipt` stays valid.
    pub async fn update_index(
        &self,
        receipt: &UploadReceipt,
        artifact: &AudioArtifact,
        metadata: &EpisodeMetadata,
        podcast: &PodcastConfig,
    ) -> Result<PublishResult> {
        let entry = IndexEntry {
            guid: metadata.guid.clone(),
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            published_at: metadata.published_at,
            url: receipt.url.clone(),
            length: artifact.byte_len,
        };
        let backend = &self.backend;
        let entry = &entry;
        let commit_ref = with_retry(&self.retry, self.attempt_timeout, "index", || async move {
            backend.update_index(podcast, entry).await
        })
        .await
        .map_err(|e| FeedcastError::PublishPartial {
            url: receipt.url.clone(),
            content_hash: receipt.content_hash.clone(),
            message: e.describe(),
        })?;

        info!(url = %receipt.url, commit = %commit_ref, "Episode published");
        Ok(PublishResult {
            url: receipt.url.clone(),
            commit_ref,
            published_at: Utc::now(),
        })
    }

    /// Upload then index in one call.
    pub async fn publish(
        &self,
        artifact: &AudioArtifact,
        metadata: &EpisodeMetadata,
        podcast: &PodcastConfig,
    ) -> Result<PublishResult> {
        let receipt = self.upload(artifact, metadata, podcast, None).await?;
        self.update_index(&receipt, artifact, metadata, podcast).await
    }
}

/// Metadata for an episode whose script and audio exist.
pub fn metadata_for(
    episode: &Episode,
    script: &Script,
    artifact: &AudioArtifact,
    podcast: &PodcastConfig,
) -> EpisodeMetadata {
    let name = if podcast.name.is_empty() {
        &podcast.id
    } else {
        &podcast.name
    };
    EpisodeMetadata {
        guid: episode.id.clone(),
        title: format!("{name}: {}", episode.created_at.format("%B %-d, %Y")),
        description: describe(&script.text()),
        published_at: episode.created_at,
        duration_secs: artifact.duration_secs,
    }
}

/// `<audio_dir>/<YYYYMMDD>_<slug>_<id prefix>.wav`; the id prefix keeps two
/// episodes of one day apart.
pub fn remote_path(podcast: &PodcastConfig, metadata: &EpisodeMetadata) -> String {
    let id: String = metadata.guid.chars().take(8).collect();
    format!(
        "{}/{}_{}_{}.wav",
        podcast.publish.audio_dir.trim_matches('/'),
        metadata.published_at.format("%Y%m%d"),
        slug(&metadata.title),
        slug(&id)
    )
}

/// Lowercase alphanumerics, everything else collapsed to `_`.
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        "episode".to_string()
    } else {
        trimmed.to_string()
    }
}

fn describe(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= defaults::INDEX_DESCRIPTION_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(defaults::INDEX_DESCRIPTION_CHARS).collect();
    format!("{}...", head.trim_end())
}
