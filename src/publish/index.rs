//! The public RSS index listing published episodes.

use crate::config::PodcastConfig;
use crate::error::CallError;
use chrono::{DateTime, Utc};
use rss::{Category, Channel, Enclosure, Guid, Item};

/// One `<item>` of the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Episode id; items are replaced by guid.
    pub guid: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub url: String,
    pub length: u64,
}

/// Insert or replace `entry` in the index document and return the new document.
///
/// `existing` is the current index, if any. Channel metadata is refreshed
/// from `podcast` on every update. The newest entry comes first.
pub fn upsert(
    existing: Option<&[u8]>,
    podcast: &PodcastConfig,
    entry: &IndexEntry,
) -> Result<String, CallError> {
    let mut channel = match existing {
        Some(bytes) => Channel::read_from(bytes)
            .map_err(|e| CallError::Permanent(format!("existing index is not valid RSS: {e}")))?,
        None => Channel::default(),
    };

    apply_channel_metadata(&mut channel, podcast);

    let mut items: Vec<Item> = channel
        .items()
        .iter()
        .filter(|item| item.guid().map(Guid::value) != Some(entry.guid.as_str()))
        .cloned()
        .collect();
    items.insert(0, item_for(entry));
    channel.set_items(items);
    channel.set_last_build_date(Utc::now().to_rfc2822());

    Ok(channel.to_string())
}

fn apply_channel_metadata(channel: &mut Channel, podcast: &PodcastConfig) {
    let title = if podcast.name.is_empty() {
        podcast.id.clone()
    } else {
        podcast.name.clone()
    };
    channel.set_title(title);
    channel.set_link(podcast.publish.base_url.clone());
    channel.set_description(if podcast.description.is_empty() {
        format!("Episodes of {}", channel.title())
    } else {
        podcast.description.clone()
    });
    channel.set_language(Some(podcast.language.clone()));
    if !podcast.author.is_empty() {
        channel.set_managing_editor(Some(podcast.author.clone()));
    }
    if !podcast.category.is_empty() {
        let mut category = Category::default();
        category.set_name(podcast.category.clone());
        channel.set_categories(vec![category]);
    }
}

fn item_for(entry: &IndexEntry) -> Item {
    let mut guid = Guid::default();
    guid.set_value(entry.guid.clone());
    guid.set_permalink(false);

    let mut enclosure = Enclosure::default();
    enclosure.set_url(entry.url.clone());
    enclosure.set_length(entry.length.to_string());
    enclosure.set_mime_type("audio/wav");

    let mut item = Item::default();
    item.set_title(Some(entry.title.clone()));
    item.set_description(Some(entry.description.clone()));
    item.set_pub_date(Some(entry.published_at.to_rfc2822()));
    item.set_guid(Some(guid));
    item.set_enclosure(Some(enclosure));
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn podcast() -> PodcastConfig {
        let mut p = PodcastConfig {
            id: "daily".to_string(),
            name: "Daily Tech".to_string(),
            description: "Tech news, read aloud".to_string(),
            author: "Ada".to_string(),
            ..Default::default()
        };
        p.publish.base_url = "https://acme.github.io/site".to_string();
        p
    }

    fn entry(guid: &str, title: &str) -> IndexEntry {
        IndexEntry {
            guid: guid.to_string(),
            title: title.to_string(),
            description: "Summary...".to_string(),
            published_at: Utc.with_ymd_and_hms(2026, 10, 19, 6, 0, 0).unwrap(),
            url: format!("https://acme.github.io/site/podcasts/{guid}.wav"),
            length: 4242,
        }
    }

    #[test]
    fn test_new_index_has_channel_and_item() {
        let xml = upsert(None, &podcast(), &entry("ep-1", "First")).unwrap();
        let channel = Channel::read_from(xml.as_bytes()).unwrap();

        assert_eq!(channel.title(), "Daily Tech");
        assert_eq!(channel.description(), "Tech news, read aloud");
        assert_eq!(channel.language(), Some("en-us"));
        assert_eq!(channel.items().len(), 1);

        let item = &channel.items()[0];
        assert_eq!(item.title(), Some("First"));
        let guid = item.guid().unwrap();
        assert_eq!(guid.value(), "ep-1");
        assert!(!guid.is_permalink());
        let enclosure = item.enclosure().unwrap();
        assert_eq!(enclosure.mime_type(), "audio/wav");
        assert_eq!(enclosure.length(), "4242");
    }

    #[test]
    fn test_newest_item_first() {
        let first = upsert(None, &podcast(), &entry("ep-1", "First")).unwrap();
        let second = upsert(Some(first.as_bytes()), &podcast(), &entry("ep-2", "Second")).unwrap();
        let channel = Channel::read_from(second.as_bytes()).unwrap();

        let titles: Vec<_> = channel.items().iter().filter_map(|i| i.title()).collect();
        assert_eq!(titles, vec!["Second", "First"]);
    }

    #[test]
    fn test_republishing_replaces_item() {
        let first = upsert(None, &podcast(), &entry("ep-1", "Draft")).unwrap();
        let again = upsert(Some(first.as_bytes()), &podcast(), &entry("ep-1", "Final")).unwrap();
        let channel = Channel::read_from(again.as_bytes()).unwrap();

        assert_eq!(channel.items().len(), 1);
        assert_eq!(channel.items()[0].title(), Some("Final"));
    }

    #[test]
    fn test_corrupt_index_is_permanent_error() {
        let result = upsert(Some(&b"<not rss"[..]), &podcast(), &entry("ep-1", "First"));
        assert!(matches!(result, Err(CallError::Permanent(_))));
    }
}
