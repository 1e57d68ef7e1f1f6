//! Fetches several sources independently and merges them into one article set.

use crate::error::{FeedcastError, Result};
use crate::feed::source::FeedSource;
use crate::pipeline::types::{Article, ArticleSet};
use crate::retry::{RetryPolicy, with_retry};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Clone)]
pub struct Aggregator {
    source: Arc<dyn FeedSource>,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    per_feed_limit: usize,
}

impl Aggregator {
    pub fn new(source: Arc<dyn FeedSource>, retry: RetryPolicy, fetch_timeout: Duration) -> Self {
        Self {
            source,
            retry,
            fetch_timeout,
            per_feed_limit: usize::MAX,
        }
    }

    /// Cap the number of in-window items taken from any one source.
    pub fn with_per_feed_limit(mut self, limit: usize) -> Self {
        self.per_feed_limit = limit.max(1);
        self
    }

    /// Fetch every source, keep items published at or after `since`,
    /// deduplicate by URL and return the newest `limit`.
    ///
    /// Failing sources are skipped and counted. Only when no source could be
    /// read at all does this fail with [`FeedcastError::NoContentAvailable`].
    pub async fn fetch(
        &self,
        sources: &[String],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<ArticleSet> {
        let fetched_at = Utc::now();
        let mut tasks = JoinSet::new();
        for (index, url) in sources.iter().enumerate() {
            let source = self.source.clone();
            let retry = self.retry;
            let timeout = self.fetch_timeout;
            let url = url.clone();
            tasks.spawn(async move {
                let label = format!("feed {url}");
                let result = with_retry(&retry, timeout, &label, || source.fetch(&url)).await;
                (index, url, result)
            });
        }

        let mut per_source: Vec<(usize, Vec<Article>)> = Vec::with_capacity(sources.len());
        let mut failed_sources = 0;
        while let Some(joined) = tasks.join_next().await {
            let (index, url, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Feed fetch task aborted");
                    failed_sources += 1;
                    continue;
                }
            };
            match result {
                Ok(mut articles) => {
                    articles.retain(|a| a.published_at >= since);
                    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
                    articles.truncate(self.per_feed_limit);
                    debug!(url, kept = articles.len(), "Source fetched");
                    per_source.push((index, articles));
                }
                Err(e) => {
                    warn!(url, error = %e.describe(), "Skipping unavailable feed source");
                    failed_sources += 1;
                }
            }
        }

        if per_source.is_empty() {
            return Err(FeedcastError::NoContentAvailable { failed_sources });
        }

        // Source order breaks timestamp ties so the result is deterministic.
        per_source.sort_by_key(|(index, _)| *index);
        let mut articles: Vec<Article> = per_source
            .into_iter()
            .flat_map(|(_, articles)| articles)
            .collect();
        articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let mut seen = HashSet::new();
        articles.retain(|a| seen.insert(canonical_url(&a.url)));
        articles.truncate(limit);

        info!(
            sources = sources.len(),
            failed_sources,
            articles = articles.len(),
            "Aggregated feeds"
        );

        Ok(ArticleSet {
            articles,
            failed_sources,
            fetched_at,
        })
    }
}

/// Query parameters that only track where a reader came from.
fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || matches!(key.as_str(), "gclid" | "fbclid" | "mc_cid" | "mc_eid")
}

/// Deduplication key for an article URL.
///
/// Ignores the scheme, host case, default port, fragment, tracking
/// parameters and a trailing slash. The path keeps its case. Strings that
/// are not absolute URLs are compared as written.
pub fn canonical_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&kept);
    }

    let mut key = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if let Some(port) = url.port() {
        key.push_str(&format!(":{port}"));
    }
    key.push_str(url.path().trim_end_matches('/'));
    if let Some(query) = url.query() {
        key.push('?');
        key.push_str(query);
    }
    key
}
