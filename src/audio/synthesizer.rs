//! Audio stage: one speech call per segment, concatenated into one WAV file.

use crate::audio::speech::{SpeechRequest, SpeechSynthesizer};
use crate::audio::wav::{self, PcmAudio};
use crate::config::PodcastConfig;
use crate::defaults;
use crate::error::{CallError, FeedcastError, Result};
use crate::files::{sha256_hex, write_atomic};
use crate::pipeline::episode::EpisodeWarning;
use crate::pipeline::types::{AudioArtifact, Script};
use crate::retry::{RetryPolicy, with_retry};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of the audio stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub artifact: AudioArtifact,
    pub warning: Option<EpisodeWarning>,
}

pub struct AudioSynthesizer {
    speech: Arc<dyn SpeechSynthesizer>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    default_voice: String,
    gap_ms: u32,
}

impl AudioSynthesizer {
    pub fn new(
        speech: Arc<dyn SpeechSynthesizer>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            speech,
            retry,
            attempt_timeout,
            default_voice: defaults::VOICE.to_string(),
            gap_ms: defaults::SEGMENT_GAP_MS,
        }
    }

    /// Voice used when neither the segment nor the podcast names one.
    pub fn with_default_voice(mut self, voice: &str) -> Self {
        self.default_voice = voice.to_string();
        self
    }

    pub fn with_gap_ms(mut self, gap_ms: u32) -> Self {
        self.gap_ms = gap_ms;
        self
    }

    /// Synthesize every segment of `script` and write the episode to `output`.
    ///
    /// Finished segments are cached in `cache_dir`; a later call with the same
    /// text and voice reuses them instead of calling the speech API again.
    pub async fn synthesize(
        &self,
        script: &Script,
        podcast: &PodcastConfig,
        output: &Path,
        cache_dir: &Path,
    ) -> Result<SynthesizedAudio> {
        if script.segments.is_empty() {
            return Err(FeedcastError::SynthesisFailed {
                segment: 0,
                message: "script has no segments".to_string(),
            });
        }
        std::fs::create_dir_all(cache_dir)?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut chunks = Vec::with_capacity(script.segments.len());
        for (index, segment) in script.segments.iter().enumerate() {
            let request = SpeechRequest {
                text: segment.text.clone(),
                voice: self.voice_for(segment.speaker.as_deref(), podcast),
                speed: podcast.voice.speed,
            };
            chunks.push(self.segment_audio(index, &request, cache_dir).await?);
        }

        let audio = wav::concat(&chunks, self.gap_ms)?;
        let bytes = audio.to_wav_bytes()?;
        write_atomic(output, &bytes)?;

        let artifact = AudioArtifact {
            path: output.to_path_buf(),
            content_hash: sha256_hex(&bytes),
            duration_secs: audio.duration_secs(),
            sample_rate: audio.sample_rate,
            byte_len: bytes.len() as u64,
            segments: chunks.len(),
        };
        let warning = duration_warning(
            artifact.duration_secs,
            podcast.target_duration_seconds,
            podcast.duration_tolerance_pct,
        );
        info!(
            podcast_id = %podcast.id,
            segments = artifact.segments,
            duration_secs = artifact.duration_secs,
            path = %artifact.path.display(),
            "Audio synthesized"
        );

        Ok(SynthesizedAudio { artifact, warning })
    }

    fn voice_for(&self, speaker: Option<&str>, podcast: &PodcastConfig) -> String {
        if let Some(tag) = speaker {
            if let Some(voice) = podcast.voice.speakers.get(tag) {
                return voice.clone();
            }
            debug!(speaker = tag, "No voice mapped for speaker, using default");
        }
        podcast
            .voice
            .voice
            .clone()
            .unwrap_or_else(|| self.default_voice.clone())
    }

    async fn segment_audio(
        &self,
        index: usize,
        request: &SpeechRequest,
        cache_dir: &Path,
    ) -> Result<PcmAudio> {
        let cached = chunk_path(cache_dir, index, request);
        if let Ok(bytes) = std::fs::read(&cached) {
            match wav::decode(&bytes) {
                Ok(audio) => {
                    debug!(segment = index, "Reusing cached segment audio");
                    return Ok(audio);
                }
                Err(e) => warn!(segment = index, error = %e, "Discarding unreadable cached segment"),
            }
        }

        let label = format!("speech segment {index}");
        let (bytes, audio) = with_retry(&self.retry, self.attempt_timeout, &label, || async {
            let bytes = self.speech.synthesize(request).await?;
            if bytes.len() < defaults::MIN_AUDIO_BYTES {
                return Err(CallError::Transient(format!(
                    "speech response too small ({} bytes)",
                    bytes.len()
                )));
            }
            let audio = wav::decode(&bytes).map_err(|e| CallError::Transient(e.to_string()))?;
            Ok((bytes, audio))
        })
        .await
        .map_err(|e| FeedcastError::SynthesisFailed {
            segment: index,
            message: e.describe(),
        })?;

        write_atomic(&cached, &bytes)?;
        Ok(audio)
    }
}

/// Cache file for a segment: index plus a hash of what was spoken and how.
fn chunk_path(cache_dir: &Path, index: usize, request: &SpeechRequest) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(request.text.as_bytes());
    hasher.update([0]);
    hasher.update(request.voice.as_bytes());
    hasher.update([0]);
    if let Some(speed) = request.speed {
        hasher.update(speed.to_le_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    cache_dir.join(format!("{index:04}-{}.wav", &digest[..16]))
}

/// `DurationMismatch` when `actual` deviates from `target` by more than `tolerance_pct`.
pub fn duration_warning(actual_secs: f32, target_secs: u32, tolerance_pct: f32) -> Option<EpisodeWarning> {
    if target_secs == 0 {
        return None;
    }
    let target = target_secs as f32;
    let deviation_pct = (actual_secs - target).abs() / target * 100.0;
    (deviation_pct > tolerance_pct).then_some(EpisodeWarning::DurationMismatch {
        actual_secs,
        target_secs,
        tolerance_pct,
    })
}
