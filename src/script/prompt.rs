//! Article selection and prompt construction for script generation.

use crate::config::PodcastConfig;
use crate::defaults;
use crate::pipeline::types::Article;
use chrono::Utc;

const DEFAULT_SYSTEM_MESSAGE: &str = "You are a professional podcast host who turns news \
articles into an engaging spoken episode. Write for the ear: short sentences, no lists, \
no markdown, no stage directions.";

/// Chooses which articles go into the prompt, in prompt order.
pub trait ArticleSelector: Send + Sync {
    fn select<'a>(&self, articles: &'a [Article], limit: usize) -> Vec<&'a Article>;
}

/// Newest first; ties keep input order.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecencySelector;

impl ArticleSelector for RecencySelector {
    fn select<'a>(&self, articles: &'a [Article], limit: usize) -> Vec<&'a Article> {
        let mut selected: Vec<&Article> = articles.iter().collect();
        selected.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        selected.truncate(limit);
        selected
    }
}

/// A chat request for the generation boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub target_words: u32,
    pub max_tokens: u32,
}

/// Builds size-bounded prompts.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub max_prompt_chars: usize,
    pub max_article_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            max_prompt_chars: defaults::MAX_PROMPT_CHARS,
            max_article_chars: defaults::MAX_ARTICLE_CHARS,
        }
    }
}

impl PromptBuilder {
    /// Build the request from already-selected articles.
    ///
    /// Articles are added in order until the article block would exceed
    /// `max_prompt_chars`; everything after the first article that does not
    /// fit is dropped. Returns the request and the number of articles used.
    pub fn build(&self, articles: &[&Article], podcast: &PodcastConfig) -> (GenerationRequest, usize) {
        let target_words = defaults::target_words(podcast.target_duration_seconds);

        let mut block = String::new();
        let mut used = 0;
        for (i, article) in articles.iter().enumerate() {
            let entry = format!(
                "Article {}: {}\nSource: {}\nPublished: {}\n{}\n\n",
                i + 1,
                article.title,
                article.source_title,
                article.published_at.format("%Y-%m-%d %H:%M UTC"),
                truncate_chars(&article.body, self.max_article_chars),
            );
            if used > 0 && block.len() + entry.len() > self.max_prompt_chars {
                break;
            }
            block.push_str(&entry);
            used += 1;
        }

        let title = if podcast.name.is_empty() {
            podcast.id.as_str()
        } else {
            podcast.name.as_str()
        };

        let mut prompt = format!(
            "Write the complete script for today's episode of the podcast '{title}' ({date}). \
             Cover the {used} articles below with an introduction, one part per story, and a \
             short closing. The script should be about {target_words} words long so it takes \
             roughly {minutes} minutes to read aloud.",
            date = Utc::now().format("%B %d, %Y"),
            minutes = (podcast.target_duration_seconds as f32 / 60.0).round() as u32,
        );
        if !podcast.description.is_empty() {
            prompt.push_str(&format!(
                " Match the style of the podcast, described as: {}.",
                podcast.description.trim_end_matches('.')
            ));
        }
        if !podcast.author.is_empty() {
            prompt.push_str(&format!(" The host's name is {}.", podcast.author));
        }
        prompt.push_str(" Separate paragraphs with blank lines.");
        if !podcast.voice.speakers.is_empty() {
            let tags: Vec<String> = podcast
                .voice
                .speakers
                .keys()
                .map(|tag| format!("[{tag}]"))
                .collect();
            prompt.push_str(&format!(
                " Start each paragraph spoken by another voice with its speaker in brackets, \
                 one of {}. Untagged paragraphs are read by the host.",
                tags.join(", ")
            ));
        }
        prompt.push_str("\n\n");
        prompt.push_str(&block);

        let system = podcast
            .instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SYSTEM_MESSAGE)
            .to_string();

        let request = GenerationRequest {
            system,
            prompt: prompt.trim_end().to_string(),
            target_words,
            // Roughly two tokens per word, with headroom.
            max_tokens: target_words.saturating_mul(2).clamp(512, 16_384),
        };
        (request, used)
    }
}

/// At most `max` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
