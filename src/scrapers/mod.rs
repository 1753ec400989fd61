//! HTML scraping helpers used by the image chain.
//!
//! | Module   | What it reads                                          |
//! |----------|--------------------------------------------------------|
//! | [`page`] | `og:image` / `twitter:image` meta and `<img>` tags     |
//!
//! Scrapers never fail the pipeline: a page that cannot be fetched or
//! parsed simply yields no image.

pub mod page;
