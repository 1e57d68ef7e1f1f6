//! Text-generation boundary.

use crate::config::GenerationConfig;
use crate::error::CallError;
use crate::script::prompt::GenerationRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CallError>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiGenerator {
    /// Build a client, reading the API key from the configured variable.
    pub fn from_config(config: &GenerationConfig, timeout: Duration) -> crate::error::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            crate::error::FeedcastError::ConfigInvalidValue {
                key: "generation.api_key_env".to_string(),
                message: format!("environment variable {} is not set", config.api_key_env),
            }
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::error::FeedcastError::Other(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CallError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: request.max_tokens,
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

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CallError::Transient(format!("malformed completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CallError::Transient("completion returned no text".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock generator for testing.
///
/// Scripted outcomes are consumed in order; once they run out every call
/// returns the default response.
pub struct MockTextGenerator {
    response: String,
    scripted: Mutex<VecDeque<Result<String, CallError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
}

impl MockTextGenerator {
    pub fn new() -> Self {
        Self {
            response: "Welcome to the show.\n\nThat is all for today.".to_string(),
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Configure the text returned once scripted outcomes are used up.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Queue one failing call.
    pub fn then_fail(self, error: CallError) -> Self {
        self.lock_scripted().push_back(Err(error));
        self
    }

    /// Queue one successful call.
    pub fn then_respond(self, response: &str) -> Self {
        self.lock_scripted().push_back(Ok(response.to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_scripted(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, CallError>>> {
        self.scripted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let next = self.lock_scripted().pop_front();
        next.unwrap_or_else(|| Ok(self.response.clone()))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
