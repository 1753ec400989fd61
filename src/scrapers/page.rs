//! Article page scraping for preview images.
//!
//! Social preview metadata is preferred because publishers curate it for
//! exactly this purpose; the first usable `<img>` is the last resort.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

static META_IMAGE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"meta[property="og:image"], meta[name="og:image"], meta[property="og:image:url"], meta[name="twitter:image"], meta[property="twitter:image"], meta[name="twitter:image:src"]"#,
    )
    .expect("static meta selector")
});

static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").expect("static img selector"));

/// Anything that can find a representative image for a web page.
#[async_trait]
pub trait PageImageScraper: Send + Sync {
    async fn page_image(&self, url: &str) -> Option<String>;
}

/// Fetches the page over HTTP and reads its metadata.
#[derive(Debug, Clone)]
pub struct HttpPageScraper {
    http: reqwest::Client,
}

impl HttpPageScraper {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("anime_post_bot/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageImageScraper for HttpPageScraper {
    #[instrument(level = "info", skip(self), fields(%url))]
    async fn page_image(&self, url: &str) -> Option<String> {
        let resp = match self.http.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "Page fetch failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!(status = resp.status().as_u16(), "Page fetch returned non-success");
            return None;
        }
        let html = match resp.text().await {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "Page body could not be read");
                return None;
            }
        };
        let found = extract_page_image(&html, url);
        debug!(found = ?found, "Scraped page image");
        found
    }
}

/// Resolve `src` against `base`, keeping only http(s) URLs.
fn absolutize(src: &str, base: Option<&str>) -> Option<String> {
    let src = src.trim();
    if src.is_empty() || src.starts_with("data:") {
        return None;
    }
    let resolved = match Url::parse(src) {
        Ok(url) => url,
        Err(_) => Url::parse(base?).ok()?.join(src).ok()?,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Tracking pixels and spacers declare a tiny size.
fn is_pixel(el: &scraper::ElementRef<'_>) -> bool {
    let tiny = |attr: &str| {
        el.value()
            .attr(attr)
            .and_then(|v| v.trim().trim_end_matches("px").parse::<u32>().ok())
            .is_some_and(|v| v <= 1)
    };
    tiny("width") || tiny("height")
}

fn first_img(document: &Html, base: Option<&str>) -> Option<String> {
    document
        .select(&IMG)
        .filter(|el| !is_pixel(el))
        .find_map(|el| el.value().attr("src").and_then(|src| absolutize(src, base)))
}

/// First usable `<img src>` in an HTML fragment such as a feed entry body.
pub fn first_image_in_fragment(html: &str, base: Option<&str>) -> Option<String> {
    first_img(&Html::parse_fragment(html), base)
}

/// Preview image of a full page: meta tags first, then the first `<img>`.
pub fn extract_page_image(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&META_IMAGE)
        .find_map(|el| {
            el.value()
                .attr("content")
                .and_then(|c| absolutize(c, Some(page_url)))
        })
        .or_else(|| first_img(&document, Some(page_url)))
}

/// Visible text of an HTML fragment, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<String>();
    crate::utils::collapse_whitespace(&text)
}
