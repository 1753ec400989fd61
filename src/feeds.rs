//! News candidate source.
//!
//! Fetches RSS/Atom feeds through [`FeedSource`], reduces entries to
//! [`FeedEntry`], and decides which entries are actual news and which
//! headlines are speculative.
//!
//! # Classification
//!
//! - An entry with tags is news when any tag contains one of the configured
//!   news terms.
//! - An entry without tags is news unless its title contains one of the
//!   non-news keywords (reviews, episode write-ups, podcasts, ...).

use crate::config::NewsSettings;
use crate::error::FeedError;
use crate::models::{Enclosure, FeedEntry};
use async_trait::async_trait;
use itertools::Itertools;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Anything that can list the most recent entries of a feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// At most `limit` entries from `url`, newest first.
    async fn fetch(&self, url: &str, limit: usize) -> Result<Vec<FeedEntry>, FeedError>;
}

/// Feed source over HTTP, parsed with `feed-rs` (RSS 0.9x/1.0/2.0, Atom, JSON Feed).
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    http: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("anime_post_bot/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    #[instrument(level = "info", skip(self), fields(%url))]
    async fn fetch(&self, url: &str, limit: usize) -> Result<Vec<FeedEntry>, FeedError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }
        let bytes = resp.bytes().await?;
        let entries = parse_feed(&bytes, url, limit)?;
        info!(count = entries.len(), "Fetched feed entries");
        Ok(entries)
    }
}

/// Parse a feed document and keep the `limit` newest entries that have a link.
pub fn parse_feed(bytes: &[u8], source: &str, limit: usize) -> Result<Vec<FeedEntry>, FeedError> {
    let feed = feed_rs::parser::parse(bytes)?;
    let entries = feed
        .entries
        .into_iter()
        .filter_map(|entry| convert_entry(entry, source))
        // Undated entries keep feed order behind dated ones.
        .sorted_by(|a, b| b.published.cmp(&a.published))
        .take(limit)
        .collect();
    Ok(entries)
}

fn convert_entry(entry: feed_rs::model::Entry, source: &str) -> Option<FeedEntry> {
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
        .map(|l| l.href.clone())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()));
    let Some(link) = link else {
        debug!(id = %entry.id, "Feed entry has no link; ignoring");
        return None;
    };

    let title = entry
        .title
        .map(|t| crate::utils::collapse_whitespace(&t.content))
        .unwrap_or_default();

    let tags = entry
        .categories
        .iter()
        .flat_map(|c| std::iter::once(c.term.clone()).chain(c.label.clone()))
        .filter(|t| !t.trim().is_empty())
        .unique()
        .collect();

    let media = entry
        .media
        .iter()
        .flat_map(|m| {
            let contents = m.content.iter().filter_map(|c| {
                let is_image = c
                    .content_type
                    .as_ref()
                    .map(|mime| mime.essence().to_string().to_ascii_lowercase().starts_with("image/"))
                    .unwrap_or(true);
                is_image.then(|| c.url.as_ref().map(|u| u.to_string())).flatten()
            });
            let thumbnails = m.thumbnails.iter().map(|t| t.image.uri.clone());
            contents.chain(thumbnails).collect::<Vec<_>>()
        })
        .unique()
        .collect();

    let enclosures = entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| Enclosure {
            url: l.href.clone(),
            mime: l.media_type.clone(),
        })
        .collect();

    Some(FeedEntry {
        source: source.to_string(),
        title,
        link,
        summary: entry.summary.map(|s| s.content),
        content_html: entry.content.and_then(|c| c.body),
        tags,
        media,
        enclosures,
        published: entry.published.or(entry.updated),
    })
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .filter(|n| !n.trim().is_empty())
        .any(|n| haystack.contains(&n.to_lowercase()))
}

/// Whether an entry is news rather than a review, column, podcast, etc.
pub fn is_news(entry: &FeedEntry, settings: &NewsSettings) -> bool {
    if entry.tags.is_empty() {
        !contains_any(&entry.title, &settings.non_news_keywords)
    } else {
        entry
            .tags
            .iter()
            .any(|tag| contains_any(tag, &settings.news_tags))
    }
}

/// Flags headlines that report rumors rather than confirmed news.
#[derive(Debug, Clone)]
pub struct SpeculationDetector {
    markers: Option<Regex>,
}

impl SpeculationDetector {
    /// Markers match case-insensitively at the start of a word.
    pub fn new(markers: &[String]) -> Self {
        let alternatives = markers
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(regex::escape)
            .join("|");
        let markers = if alternatives.is_empty() {
            None
        } else {
            match Regex::new(&format!(r"(?i)\b(?:{alternatives})")) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(error = %e, "Invalid speculative markers; only question headlines will be flagged");
                    None
                }
            }
        };
        Self { markers }
    }

    pub fn is_speculative(&self, headline: &str) -> bool {
        let headline = headline.trim();
        headline.ends_with('?')
            || self
                .markers
                .as_ref()
                .is_some_and(|re| re.is_match(headline))
    }
}
