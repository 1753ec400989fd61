//! Data carried between pipeline stages.
//!
//! - [`FeedEntry`]: one item read from a news feed
//! - [`ResolvedImage`]: an image URL plus the stage of the chain that found it
//! - [`PostOutcome`] / [`RunReport`]: what a run did, for logging

use chrono::{DateTime, Utc};
use std::fmt;

/// A feed item reduced to what the news variant needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    /// Feed URL the entry was read from.
    pub source: String,
    pub title: String,
    /// Canonical link; doubles as the record key.
    pub link: String,
    /// Plain-text or HTML summary.
    pub summary: Option<String>,
    /// HTML body, when the feed carries one.
    pub content_html: Option<String>,
    /// Category terms and labels.
    pub tags: Vec<String>,
    /// Image URLs from structured media attachments (media RSS, thumbnails).
    pub media: Vec<String>,
    /// Enclosure links.
    pub enclosures: Vec<Enclosure>,
    pub published: Option<DateTime<Utc>>,
}

/// An enclosure link with its declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime: Option<String>,
}

impl Enclosure {
    pub fn is_image(&self) -> bool {
        self.mime
            .as_deref()
            .map(|m| m.to_ascii_lowercase().starts_with("image/"))
            .unwrap_or(false)
    }
}

/// Stage of the image chain that produced a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Media,
    Enclosure,
    Embedded,
    Page,
    Search,
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImageSource::Media => "media",
            ImageSource::Enclosure => "enclosure",
            ImageSource::Embedded => "embedded",
            ImageSource::Page => "page",
            ImageSource::Search => "search",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub url: String,
    pub source: ImageSource,
}

/// Result of one publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// Posted; carries the platform's post id.
    Published(String),
    /// Dry run: everything but the post itself.
    DryRun,
    /// Platform refused or was unreachable; record untouched.
    Failed,
    /// Nothing postable was left; record untouched.
    Skipped,
}

/// Summary of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Final texts that went out (or would have, in a dry run).
    pub posted: Vec<String>,
    /// Candidates dropped before publishing (duplicates, missing images, empty text).
    pub skipped: usize,
    /// Publish attempts the platform rejected.
    pub failed: usize,
}
