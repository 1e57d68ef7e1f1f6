//! Script stage: articles in, segmented script out.

use crate::config::PodcastConfig;
use crate::error::{CallError, FeedcastError, Result};
use crate::pipeline::types::{Article, Script};
use crate::retry::{RetryPolicy, with_retry};
use crate::script::generator::TextGenerator;
use crate::script::prompt::{ArticleSelector, PromptBuilder, RecencySelector};
use crate::script::segmenter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct ScriptSynthesizer {
    generator: Arc<dyn TextGenerator>,
    selector: Arc<dyn ArticleSelector>,
    prompt: PromptBuilder,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    max_segment_chars: usize,
}

impl ScriptSynthesizer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            selector: Arc::new(RecencySelector),
            prompt: PromptBuilder::default(),
            retry,
            attempt_timeout,
            max_segment_chars: crate::defaults::MAX_SEGMENT_CHARS,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn ArticleSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_prompt_builder(mut self, prompt: PromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_max_segment_chars(mut self, max_chars: usize) -> Self {
        self.max_segment_chars = max_chars;
        self
    }

    /// Generate and segment a script for `podcast` from `articles`.
    pub async fn synthesize(&self, articles: &[Article], podcast: &PodcastConfig) -> Result<Script> {
        if articles.is_empty() {
            return Err(FeedcastError::EmptyArticleSet);
        }

        let selected = self.selector.select(articles, podcast.article_limit());
        let (request, used) = self.prompt.build(&selected, podcast);
        debug!(
            podcast_id = %podcast.id,
            available = articles.len(),
            used,
            prompt_chars = request.prompt.len(),
            "Built generation prompt"
        );

        let label = format!("generate {}", self.generator.model_name());
        let text = with_retry(&self.retry, self.attempt_timeout, &label, || async {
            let text = self.generator.generate(&request).await?;
            if text.split_whitespace().next().is_none() {
                return Err(CallError::Transient("empty completion".to_string()));
            }
            Ok(text)
        })
        .await
        .map_err(|e| FeedcastError::GenerationFailed {
            message: e.describe(),
        })?;

        let segments = segmenter::segment(&text, self.max_segment_chars);
        if segments.is_empty() {
            return Err(FeedcastError::GenerationFailed {
                message: "generated script has no speakable text".to_string(),
            });
        }

        let script = Script {
            segments,
            target_words: request.target_words,
        };
        info!(
            podcast_id = %podcast.id,
            segments = script.segments.len(),
            words = script.word_count(),
            target_words = script.target_words,
            "Script generated"
        );
        Ok(script)
    }
}
