//! Default configuration constants for feedcast.
//!
//! Shared across configuration types and stage components so that the
//! configuration file, the CLI and the tests agree on the same values.

/// Average speaking rate used to turn a target duration into a word budget.
///
/// 150 words per minute is a typical pace for a news read.
pub const WORDS_PER_MINUTE: u32 = 150;

/// Silence inserted between consecutive segments, in milliseconds.
pub const SEGMENT_GAP_MS: u32 = 500;

/// Maximum characters sent to the speech API in a single request.
pub const MAX_SEGMENT_CHARS: usize = 4000;

/// Character budget for the article block of the generation prompt.
///
/// Keeps the prompt well under the context limit of current chat models.
pub const MAX_PROMPT_CHARS: usize = 24_000;

/// Per-article cap inside the prompt.
pub const MAX_ARTICLE_CHARS: usize = 2_000;

/// Attempts per external call before giving up (first try included).
pub const MAX_ATTEMPTS: u32 = 3;

/// First backoff delay in milliseconds; doubles on each retry.
pub const BASE_DELAY_MS: u64 = 1_000;

/// Upper bound for a single backoff delay in milliseconds.
pub const MAX_DELAY_MS: u64 = 30_000;

/// Default target episode duration (10 minutes).
pub const TARGET_DURATION_SECS: u32 = 600;

/// Default allowed deviation from the target duration, in percent.
pub const DURATION_TOLERANCE_PCT: f32 = 15.0;

/// Default lookback window for feed entries.
pub const LOOKBACK: &str = "1day";

/// Default cap on items taken from one feed.
pub const MAX_ARTICLES_PER_FEED: usize = 15;

/// Speech API responses smaller than this are treated as broken audio.
pub const MIN_AUDIO_BYTES: usize = 100;

/// Characters of the script used for the index item description.
pub const INDEX_DESCRIPTION_CHARS: usize = 200;

/// Default index file name inside the publication repository.
pub const INDEX_FILE: &str = "podcast.xml";

/// Default directory for audio files inside the publication repository.
pub const AUDIO_DIR: &str = "podcasts";

/// Default OpenAI-compatible API base.
pub const API_BASE: &str = "https://api.openai.com/v1";

/// Default chat model for script generation.
pub const GENERATION_MODEL: &str = "gpt-4o";

/// Default speech model.
pub const SPEECH_MODEL: &str = "tts-1";

/// Default voice when neither the segment nor the podcast names one.
pub const VOICE: &str = "alloy";

/// Number of articles the script prompt uses for a given target duration,
/// when the podcast does not configure `max_articles` explicitly.
///
/// Short shows (< 5 min) cover 5 stories, medium shows (≤ 15 min) 10,
/// longer shows 15.
pub fn article_budget(target_duration_secs: u32) -> usize {
    let minutes = target_duration_secs / 60;
    if minutes < 5 {
        5
    } else if minutes <= 15 {
        10
    } else {
        15
    }
}

/// Longest episode a podcast may ask for (4 hours).
pub const MAX_TARGET_DURATION_SECS: u32 = 4 * 60 * 60;

/// Target word count for a spoken duration.
pub fn target_words(target_duration_secs: u32) -> u32 {
    target_duration_secs.saturating_mul(WORDS_PER_MINUTE) / 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_budget_scales_with_duration() {
        assert_eq!(article_budget(180), 5);
        assert_eq!(article_budget(300), 10);
        assert_eq!(article_budget(900), 10);
        assert_eq!(article_budget(1200), 15);
    }

    #[test]
    fn target_words_uses_speaking_rate() {
        assert_eq!(target_words(600), 1500);
        assert_eq!(target_words(60), WORDS_PER_MINUTE);
        assert_eq!(target_words(0), 0);
    }

    #[test]
    fn target_words_saturates_on_huge_durations() {
        assert_eq!(target_words(u32::MAX), u32::MAX / 60);
    }
}
