//! Image resolution and download.
//!
//! The resolution chain, first candidate that downloads wins:
//!
//! 1. structured media attachment on the feed entry
//! 2. enclosure with an `image/*` type
//! 3. `<img>` embedded in the entry's HTML content or summary
//! 4. the linked page's `og:image` / `twitter:image`, else its first `<img>`
//! 5. external image search keyed by the post text
//!
//! Each candidate URL is downloaded into a [`DownloadedImage`], which owns a
//! temporary file that is deleted when the value is dropped or discarded.

use crate::config::ImageSearchCredentials;
use crate::error::ImageError;
use crate::models::{FeedEntry, ImageSource, ResolvedImage};
use crate::scrapers::page::{PageImageScraper, first_image_in_fragment};
use async_trait::async_trait;
use itertools::Itertools;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Platform limit for still images.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Free-text image search returning at most one URL.
#[async_trait]
pub trait ImageSearch: Send + Sync {
    async fn search(&self, query: &str) -> Option<String>;
}

/// Google Custom Search JSON API in image mode.
#[derive(Debug, Clone)]
pub struct GoogleImageSearch {
    http: reqwest::Client,
    credentials: ImageSearchCredentials,
}

#[derive(Deserialize)]
struct SearchResponse {
    items: Option<Vec<SearchItem>>,
}

#[derive(Deserialize)]
struct SearchItem {
    link: String,
}

impl GoogleImageSearch {
    const ENDPOINT: &'static str = "https://www.googleapis.com/customsearch/v1";

    pub fn new(credentials: ImageSearchCredentials, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, credentials })
    }
}

#[async_trait]
impl ImageSearch for GoogleImageSearch {
    #[instrument(level = "info", skip_all)]
    async fn search(&self, query: &str) -> Option<String> {
        let resp = self
            .http
            .get(Self::ENDPOINT)
            .query(&[
                ("q", query),
                ("cx", self.credentials.engine_id.as_str()),
                ("key", self.credentials.api_key.as_str()),
                ("searchType", "image"),
                ("num", "1"),
                ("safe", "active"),
            ])
            .send()
            .await;
        let resp = match resp {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "Image search returned non-success");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Image search request failed");
                return None;
            }
        };
        match resp.json::<SearchResponse>().await {
            Ok(body) => body.items.and_then(|items| items.into_iter().next()).map(|i| i.link),
            Err(e) => {
                warn!(error = %e, "Image search response was malformed");
                None
            }
        }
    }
}

/// Image URLs carried by the entry itself (stages 1 to 3), in chain order.
pub fn images_from_entry(entry: &FeedEntry) -> Vec<ResolvedImage> {
    let media = entry.media.iter().map(|url| ResolvedImage {
        url: url.clone(),
        source: ImageSource::Media,
    });
    let enclosures = entry
        .enclosures
        .iter()
        .filter(|e| e.is_image())
        .map(|e| ResolvedImage {
            url: e.url.clone(),
            source: ImageSource::Enclosure,
        });
    let embedded = [entry.content_html.as_deref(), entry.summary.as_deref()]
        .into_iter()
        .flatten()
        .filter_map(|html| first_image_in_fragment(html, Some(&entry.link)))
        .map(|url| ResolvedImage {
            url,
            source: ImageSource::Embedded,
        });
    media
        .chain(enclosures)
        .chain(embedded)
        .unique_by(|found| found.url.clone())
        .collect()
}

/// Walks the resolution chain, downloading as it goes.
///
/// A candidate that fails to download does not end the chain; later
/// stages are only consulted once every earlier candidate has failed.
pub struct ImageResolver<'a> {
    pages: &'a dyn PageImageScraper,
    search: Option<&'a dyn ImageSearch>,
    downloader: &'a dyn ImageDownloader,
}

impl<'a> ImageResolver<'a> {
    pub fn new(
        pages: &'a dyn PageImageScraper,
        search: Option<&'a dyn ImageSearch>,
        downloader: &'a dyn ImageDownloader,
    ) -> Self {
        Self {
            pages,
            search,
            downloader,
        }
    }

    /// Full chain for a news entry; `post_text` keys the final search stage.
    #[instrument(level = "info", skip_all, fields(link = %entry.link))]
    pub async fn fetch_for_entry(&self, entry: &FeedEntry, post_text: &str) -> Option<DownloadedImage> {
        let mut tried = Vec::new();
        for found in images_from_entry(entry) {
            if let Some(image) = self.try_download(&found).await {
                return Some(image);
            }
            tried.push(found.url);
        }
        if let Some(url) = self.pages.page_image(&entry.link).await {
            if tried.contains(&url) {
                debug!(%url, "Page image already failed as a feed candidate");
            } else {
                let found = ResolvedImage {
                    url,
                    source: ImageSource::Page,
                };
                if let Some(image) = self.try_download(&found).await {
                    return Some(image);
                }
            }
        }
        self.fetch_for_text(post_text).await
    }

    /// Search-only resolution, for posts with no source page.
    pub async fn fetch_for_text(&self, post_text: &str) -> Option<DownloadedImage> {
        let Some(search) = self.search else {
            debug!("Image search not configured");
            return None;
        };
        let url = search.search(post_text).await?;
        self.try_download(&ResolvedImage {
            url,
            source: ImageSource::Search,
        })
        .await
    }

    async fn try_download(&self, found: &ResolvedImage) -> Option<DownloadedImage> {
        match self.downloader.download(&found.url).await {
            Ok(image) => {
                info!(source = %found.source, url = %found.url, "Resolved image");
                Some(image)
            }
            Err(e) => {
                warn!(source = %found.source, url = %found.url, error = %e, "Image download failed; trying next candidate");
                None
            }
        }
    }
}

/// A downloaded image in a temporary file.
#[derive(Debug)]
pub struct DownloadedImage {
    file: NamedTempFile,
    pub mime: String,
    pub source_url: String,
}

impl DownloadedImage {
    /// Wrap already-written bytes in a temporary file.
    pub fn from_bytes(bytes: &[u8], mime: &str, source_url: &str) -> Result<Self, ImageError> {
        let mut file = tempfile::Builder::new()
            .prefix("post-image-")
            .suffix(extension_for(mime))
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self {
            file,
            mime: mime.to_string(),
            source_url: source_url.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the temporary file now, logging instead of failing.
    pub fn discard(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary image");
        } else {
            debug!(path = %path.display(), "Removed temporary image");
        }
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        _ => ".jpg",
    }
}

/// Fetches an image URL into a local temporary file.
#[async_trait]
pub trait ImageDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<DownloadedImage, ImageError>;
}

#[derive(Debug, Clone)]
pub struct HttpImageDownloader {
    http: reqwest::Client,
}

impl HttpImageDownloader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("anime_post_bot/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ImageDownloader for HttpImageDownloader {
    #[instrument(level = "info", skip(self), fields(%url))]
    async fn download(&self, url: &str) -> Result<DownloadedImage, ImageError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ImageError::Status(status.as_u16()));
        }
        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .unwrap_or_default();
        if !mime.starts_with("image/") {
            return Err(ImageError::NotAnImage(mime));
        }
        let bytes = resp.bytes().await?;
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ImageError::TooLarge(bytes.len()));
        }
        let image = DownloadedImage::from_bytes(&bytes, &mime, url)?;
        info!(bytes = bytes.len(), %mime, path = %image.path().display(), "Downloaded image");
        Ok(image)
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::models::Enclosure;

    fn entry() -> FeedEntry {
        FeedEntry {
            title: "Title".into(),
            link: "https://news.example.com/story".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_media_beats_enclosure() {
        let mut e = entry();
        e.media = vec!["https://img.example.com/m.jpg".into()];
        e.enclosures = vec![Enclosure {
            url: "https://img.example.com/e.jpg".into(),
            mime: Some("image/jpeg".into()),
        }];
        let found = images_from_entry(&e);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].source, ImageSource::Media);
        assert_eq!(found[1].source, ImageSource::Enclosure);
    }

    #[test]
    fn test_non_image_enclosure_is_ignored() {
        let mut e = entry();
        e.enclosures = vec![
            Enclosure {
                url: "https://cdn.example.com/ep.mp3".into(),
                mime: Some("audio/mpeg".into()),
            },
            Enclosure {
                url: "https://cdn.example.com/cover.png".into(),
                mime: Some("image/png".into()),
            },
        ];
        let found = images_from_entry(&e);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, ImageSource::Enclosure);
        assert_eq!(found[0].url, "https://cdn.example.com/cover.png");
    }

    #[test]
    fn test_embedded_img_resolves_relative_to_link() {
        let mut e = entry();
        e.summary = Some(r#"<p><img src="/pics/a.jpg"> Studio confirms.</p>"#.into());
        let found = images_from_entry(&e);
        assert_eq!(found[0].source, ImageSource::Embedded);
        assert_eq!(found[0].url, "https://news.example.com/pics/a.jpg");
    }

    #[test]
    fn test_repeated_candidates_are_listed_once() {
        let mut e = entry();
        e.media = vec!["https://img.example.com/a.jpg".into()];
        e.content_html = Some(r#"<img src="https://img.example.com/a.jpg">"#.into());
        assert_eq!(images_from_entry(&e).len(), 1);
    }

    #[tokio::test]
    async fn test_page_then_search() {
        let e = entry();
        let pages = MapPages(
            [(e.link.clone(), "https://news.example.com/og.jpg".to_string())]
                .into_iter()
                .collect(),
        );
        let search = FixedSearch(Some("https://search.example.com/s.jpg".into()));
        let downloader = FakeDownloader::default();
        let resolver = ImageResolver::new(&pages, Some(&search), &downloader);
        let image = resolver.fetch_for_entry(&e, "text").await.unwrap();
        assert_eq!(image.source_url, "https://news.example.com/og.jpg");

        let empty_pages = MapPages::default();
        let resolver = ImageResolver::new(&empty_pages, Some(&search), &downloader);
        let image = resolver.fetch_for_entry(&e, "text").await.unwrap();
        assert_eq!(image.source_url, "https://search.example.com/s.jpg");
    }

    #[tokio::test]
    async fn test_failed_download_falls_through_to_later_stages() {
        let mut e = entry();
        e.media = vec!["https://img.example.com/broken.jpg".into()];
        let pages = MapPages(
            [(e.link.clone(), "https://news.example.com/og.jpg".to_string())]
                .into_iter()
                .collect(),
        );
        let downloader = FakeDownloader {
            failing: vec!["https://img.example.com/broken.jpg".into()],
            ..Default::default()
        };
        let resolver = ImageResolver::new(&pages, None, &downloader);
        let image = resolver.fetch_for_entry(&e, "text").await.unwrap();
        assert_eq!(image.source_url, "https://news.example.com/og.jpg");
        assert_eq!(downloader.paths.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_every_candidate_failing_resolves_to_none() {
        let mut e = entry();
        e.media = vec!["https://img.example.com/m.jpg".into()];
        let pages = MapPages(
            [(e.link.clone(), "https://img.example.com/m.jpg".to_string())]
                .into_iter()
                .collect(),
        );
        let search = FixedSearch(Some("https://search.example.com/s.jpg".into()));
        let downloader = FakeDownloader {
            failing: vec![
                "https://img.example.com/m.jpg".into(),
                "https://search.example.com/s.jpg".into(),
            ],
            ..Default::default()
        };
        let resolver = ImageResolver::new(&pages, Some(&search), &downloader);
        assert!(resolver.fetch_for_entry(&e, "text").await.is_none());
    }

    #[tokio::test]
    async fn test_nothing_anywhere_resolves_to_none() {
        let pages = MapPages::default();
        let search = FixedSearch(None);
        let downloader = FakeDownloader::default();
        let resolver = ImageResolver::new(&pages, Some(&search), &downloader);
        assert!(resolver.fetch_for_entry(&entry(), "text").await.is_none());

        let resolver = ImageResolver::new(&pages, None, &downloader);
        assert!(resolver.fetch_for_text("text").await.is_none());
    }

    #[test]
    fn test_discard_removes_file() {
        let image = DownloadedImage::from_bytes(b"data", "image/webp", "https://x").unwrap();
        let path = image.path().to_path_buf();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".webp"));
        image.discard();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_file() {
        let path = {
            let image = DownloadedImage::from_bytes(b"data", "image/jpeg", "https://x").unwrap();
            image.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
