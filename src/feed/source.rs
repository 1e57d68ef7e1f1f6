//! Feed source boundary: fetch one feed document and normalize its items.

use crate::error::CallError;
use crate::pipeline::types::Article;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Read-only access to feed documents by URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch `url` and return its items as articles, in feed order.
    async fn fetch(&self, url: &str) -> Result<Vec<Article>, CallError>;
}

/// RSS or Atom over HTTP(S).
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedcast/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<Article>, CallError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallError::from_status(status, ""));
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| CallError::from_reqwest(&e))?;

        let articles = parse_feed(url, &content, Utc::now())?;
        debug!(url, items = articles.len(), "Fetched feed");
        Ok(articles)
    }
}

/// Parse an RSS or Atom document into articles.
///
/// Items without a date are stamped with `fetched_at`. Malformed documents
/// are a permanent error: refetching the same bytes cannot help.
pub fn parse_feed(
    url: &str,
    content: &[u8],
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Article>, CallError> {
    let feed = feed_rs::parser::parse(content)
        .map_err(|e| CallError::Permanent(format!("Unable to parse feed {url}: {e}")))?;

    let source_title = feed
        .title
        .as_ref()
        .map(|t| t.content.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(url)
        .to_string();

    Ok(feed
        .entries
        .iter()
        .filter_map(|entry| article_from_entry(url, &source_title, entry, fetched_at))
        .collect())
}

fn article_from_entry(
    source: &str,
    source_title: &str,
    entry: &Entry,
    fetched_at: DateTime<Utc>,
) -> Option<Article> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim())
        .unwrap_or_default()
        .to_string();
    // Atom entries may carry several links; the alternate one is the article.
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .or(entry.links.first())
        .map(|l| l.href.trim())
        .filter(|l| !l.is_empty())
        .or_else(|| Some(entry.id.trim()).filter(|id| id.starts_with("http")))
        .unwrap_or_default()
        .to_string();

    if title.is_empty() && link.is_empty() {
        debug!(source, "Skipping feed item without title or link");
        return None;
    }

    let published_at = match entry.published.or(entry.updated) {
        Some(date) => date,
        None => {
            warn!(source, title, "Item has no date, using fetch time");
            fetched_at
        }
    };

    let raw = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .filter(|c| !c.trim().is_empty())
        .or(entry.summary.as_ref().map(|t| t.content.as_str()))
        .unwrap_or_default();
    let mut body = html_to_text(raw);
    if body.is_empty() {
        body = format!(
            "Article titled '{title}' from {source_title}. Visit {link} for more information."
        );
    }

    let url = if link.is_empty() {
        format!("{source}#{title}")
    } else {
        link
    };

    Some(Article {
        source: source.to_string(),
        source_title: source_title.to_string(),
        title,
        body,
        published_at,
        url,
    })
}

/// Visible text of an HTML fragment, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let fragment = scraper::Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Mock feed source for testing.
///
/// Unknown URLs fail permanently, like a 404.
#[derive(Default)]
pub struct MockFeedSource {
    feeds: HashMap<String, Result<Vec<Article>, CallError>>,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
}

impl MockFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `articles` for `url`.
    pub fn with_feed(mut self, url: &str, articles: Vec<Article>) -> Self {
        self.feeds.insert(url.to_string(), Ok(articles));
        self
    }

    /// Fail every fetch of `url` with `error`.
    pub fn with_failure(mut self, url: &str, error: CallError) -> Self {
        self.feeds.insert(url.to_string(), Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl FeedSource for MockFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<Article>, CallError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(url.to_string())
            .or_insert(0) += 1;

        self.feeds
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(CallError::Permanent(format!("HTTP 404 Not Found: {url}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>https://news.example</link>
    <description>All the news</description>
    <item>
      <title>First story</title>
      <link>https://news.example/first</link>
      <description>&lt;p&gt;Something &lt;b&gt;happened&lt;/b&gt; today.&lt;/p&gt;</description>
      <pubDate>Mon, 19 Oct 2026 08:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Undated story</title>
      <link>https://news.example/undated</link>
      <description>No date here.</description>
    </item>
    <item>
      <title>Empty story</title>
      <link>https://news.example/empty</link>
      <pubDate>Sun, 18 Oct 2026 08:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_feed_normalizes_items() {
        let articles = parse_feed("https://news.example/rss", FEED.as_bytes(), fetched_at()).unwrap();

        assert_eq!(articles.len(), 3);
        let first = &articles[0];
        assert_eq!(first.source, "https://news.example/rss");
        assert_eq!(first.source_title, "Example News");
        assert_eq!(first.title, "First story");
        assert_eq!(first.body, "Something happened today.");
        assert_eq!(first.url, "https://news.example/first");
        assert_eq!(
            first.published_at,
            Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_undated_item_uses_fetch_time() {
        let articles = parse_feed("https://news.example/rss", FEED.as_bytes(), fetched_at()).unwrap();
        assert_eq!(articles[1].published_at, fetched_at());
    }

    #[test]
    fn test_empty_body_gets_fallback_text() {
        let articles = parse_feed("https://news.example/rss", FEED.as_bytes(), fetched_at()).unwrap();
        assert_eq!(
            articles[2].body,
            "Article titled 'Empty story' from Example News. \
             Visit https://news.example/empty for more information."
        );
    }

    #[test]
    fn test_parses_atom_feed() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Blog</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93c-0003939e0af6</id>
  <updated>2026-10-19T09:00:00Z</updated>
  <entry>
    <title>Atom story</title>
    <link rel="alternate" href="https://blog.example/atom-story"/>
    <link rel="enclosure" href="https://blog.example/atom-story.mp3"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2026-10-19T09:00:00Z</updated>
    <summary type="html">&lt;p&gt;Written in &lt;em&gt;Atom&lt;/em&gt; today&lt;/p&gt;</summary>
  </entry>
</feed>"#;

        let articles = parse_feed("https://blog.example/atom", atom.as_bytes(), fetched_at()).unwrap();

        assert_eq!(articles.len(), 1);
        let story = &articles[0];
        assert_eq!(story.source_title, "Example Blog");
        assert_eq!(story.title, "Atom story");
        assert_eq!(story.url, "https://blog.example/atom-story");
        assert_eq!(story.body, "Written in Atom today");
        assert_eq!(
            story.published_at,
            Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_malformed_feed_is_permanent_error() {
        let result = parse_feed("https://x.example", b"<html>not a feed</html>", fetched_at());
        assert!(matches!(result, Err(CallError::Permanent(_))));
    }

    #[test]
    fn test_html_to_text_collapses_whitespace() {
        assert_eq!(html_to_text("<p>a\n\n  <i>b</i></p><p>c</p>"), "a b c");
        assert_eq!(html_to_text(""), "");
    }

    #[tokio::test]
    async fn test_mock_counts_calls_per_url() {
        let mock = MockFeedSource::new()
            .with_feed("https://a.example", Vec::new())
            .with_failure("https://b.example", CallError::Transient("503".to_string()));

        assert!(mock.fetch("https://a.example").await.is_ok());
        assert!(mock.fetch("https://b.example").await.is_err());
        assert!(mock.fetch("https://c.example").await.is_err());

        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.calls_for("https://a.example"), 1);
        assert_eq!(mock.calls_for("https://missing.example"), 0);
    }
}
