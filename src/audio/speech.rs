//! Text-to-speech boundary.

use crate::audio::wav::PcmAudio;
use crate::config::SpeechConfig;
use crate::error::{CallError, FeedcastError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One speech request: a segment's text and the voice to read it with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

/// Converts text to WAV audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> std::result::Result<Vec<u8>, CallError>;

    fn model_name(&self) -> &str;
}

/// Client for OpenAI-compatible `/audio/speech` endpoints.
pub struct OpenAiSpeech {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
    response_format: &'a str,
}

impl OpenAiSpeech {
    /// Build a client, reading the API key from the configured variable.
    pub fn from_config(config: &SpeechConfig, timeout: Duration) -> Result<Self> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| FeedcastError::ConfigInvalidValue {
                key: "speech.api_key_env".to_string(),
                message: format!("environment variable {} is not set", config.api_key_env),
            })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedcastError::Other(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/audio/speech", config.api_base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, request: &SpeechRequest) -> std::result::Result<Vec<u8>, CallError> {
        let body = SpeechBody {
            model: &self.model,
            input: &request.text,
            voice: &request.voice,
            speed: request.speed,
            response_format: "wav",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status, &text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;
        Ok(bytes.to_vec())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock speech synthesizer for testing.
///
/// Returns silent WAV audio whose length follows the text at 150 words per
/// minute, or a fixed length per request when configured.
pub struct MockSpeechSynthesizer {
    sample_rate: u32,
    fixed_secs: Option<f32>,
    scripted: Mutex<VecDeque<Option<CallError>>>,
    requests: Mutex<Vec<SpeechRequest>>,
    calls: AtomicUsize,
}

impl MockSpeechSynthesizer {
    pub fn new() -> Self {
        Self {
            sample_rate: 8000,
            fixed_secs: None,
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every request yields exactly `secs` of audio.
    pub fn with_duration(mut self, secs: f32) -> Self {
        self.fixed_secs = Some(secs);
        self
    }

    /// Fail the next unscripted call with `error`.
    pub fn then_fail(self, error: CallError) -> Self {
        self.script(Some(error))
    }

    /// Let the next unscripted call succeed; use before `then_fail` to
    /// fail a later call.
    pub fn then_succeed(self) -> Self {
        self.script(None)
    }

    fn script(self, outcome: Option<CallError>) -> Self {
        self.scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, including failed ones.
    pub fn requests(&self) -> Vec<SpeechRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockSpeechSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeechSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> std::result::Result<Vec<u8>, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let scripted = self
            .scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .flatten();
        if let Some(error) = scripted {
            return Err(error);
        }

        let secs = self
            .fixed_secs
            .unwrap_or_else(|| crate::script::segmenter::estimate_secs(&request.text));
        let audio = PcmAudio {
            samples: vec![0; (secs * self.sample_rate as f32).round() as usize],
            sample_rate: self.sample_rate,
        };
        audio
            .to_wav_bytes()
            .map_err(|e| CallError::Permanent(e.to_string()))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
