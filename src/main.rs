//! # Anime Post Bot
//!
//! A scheduled X/Twitter posting bot. Each invocation produces one short
//! anime fact (or picks one fresh news item), makes sure it has not been
//! posted before, fits it under the platform's length ceiling, optionally
//! attaches an image, publishes it, records it, and exits.
//!
//! ## Variants
//!
//! - `facts`: generated fact about any anime or manga
//! - `franchise`: generated fact about Naruto / Boruto
//! - `news`: newest eligible feed entry, headline rewritten, image required
//!
//! ## Usage
//!
//! ```sh
//! anime_post_bot --variant news --config bot.yaml
//! ```
//!
//! ## Architecture
//!
//! 1. **Record**: load the JSON list of what was already posted
//! 2. **Candidate**: generate with model fallback, or fetch and filter feeds
//! 3. **Shape**: reject duplicates, enforce the length ceiling
//! 4. **Image**: feed media, article page, then image search
//! 5. **Publish**: upload, post, append to the record
//!
//! Only configuration problems are fatal; everything after startup is
//! logged and the run exits cleanly.

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod feeds;
mod generator;
mod images;
mod length;
mod models;
mod oauth;
mod pipeline;
mod prompts;
mod publisher;
mod record;
mod scrapers;
mod twitter;
mod utils;

use api::OpenAiClient;
use cli::Cli;
use config::{BotConfig, Secrets};
use feeds::HttpFeedSource;
use images::{GoogleImageSearch, HttpImageDownloader, ImageSearch};
use pipeline::Services;
use record::JsonFileStore;
use scrapers::page::HttpPageScraper;
use twitter::TwitterClient;

#[tokio::main(flavor = "current_thread")]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // A missing .env is fine; the environment may already carry the secrets.
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("anime_post_bot starting up");
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => warn!(error = %e, "Failed to load .env; continuing with process environment"),
    }

    // Parse CLI
    let args = Cli::parse();
    debug!(variant = args.variant.as_str(), ?args.config, dry_run = args.dry_run, "Parsed CLI arguments");

    // ---- Configuration: the only fatal stage ----
    let config = match BotConfig::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    let secrets = match Secrets::from_cli(&args) {
        Ok(secrets) => secrets,
        Err(e) => {
            error!(error = %e, "Missing required configuration");
            return Err(e.into());
        }
    };
    info!(
        variant = config.variant.as_str(),
        record_file = %config.record_file,
        image_search = secrets.image_search.is_some(),
        "Configuration loaded"
    );

    // ---- Clients ----
    let timeout = config.http_timeout();
    let generator = OpenAiClient::new(secrets.openai_api_key.clone(), &config.generation.api_base, timeout)?;
    let platform = TwitterClient::new(secrets.twitter.clone(), timeout)?;
    let store = JsonFileStore::new(&config.record_file);
    let feeds = HttpFeedSource::new(timeout)?;
    let pages = HttpPageScraper::new(timeout)?;
    let downloader = HttpImageDownloader::new(timeout)?;
    let image_search = match secrets.image_search.clone() {
        Some(credentials) => Some(GoogleImageSearch::new(credentials, timeout)?),
        None => None,
    };

    let services = Services {
        generator: &generator,
        platform: &platform,
        store: &store,
        feeds: &feeds,
        pages: &pages,
        image_search: image_search.as_ref().map(|s| s as &dyn ImageSearch),
        downloader: &downloader,
    };

    // ---- Run ----
    let report = pipeline::run(&config, &services, args.dry_run).await;

    let elapsed = start_time.elapsed();
    info!(
        variant = config.variant.as_str(),
        posted = report.posted.len(),
        skipped = report.skipped,
        failed = report.failed,
        dry_run = args.dry_run,
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
