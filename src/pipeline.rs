//! The posting pipeline.
//!
//! One run: load the record, obtain a candidate (generated fact, or a
//! filtered feed entry with a rewritten headline), reject duplicates,
//! enforce the length ceiling, resolve an image, publish, and append the
//! record entry on success. Nothing here returns an error: every
//! operational failure is logged and the run simply does less.

use crate::api::TextGenerator;
use crate::config::{BotConfig, ImagePolicy, Variant};
use crate::feeds::{FeedSource, SpeculationDetector, is_news};
use crate::generator::{FallbackChain, Origin};
use crate::images::{DownloadedImage, ImageDownloader, ImageResolver, ImageSearch};
use crate::length::{compose_post, enforce_length};
use crate::models::{FeedEntry, PostOutcome, RunReport};
use crate::prompts;
use crate::publisher::{SocialPlatform, publish};
use crate::record::{PostRecord, RecordStore};
use crate::scrapers::page::{PageImageScraper, html_to_text};
use crate::utils::{collapse_whitespace, truncate_for_log};
use tracing::{debug, error, info, instrument, warn};

/// External collaborators, injected so tests can swap in doubles.
pub struct Services<'a> {
    pub generator: &'a dyn TextGenerator,
    pub platform: &'a dyn SocialPlatform,
    pub store: &'a dyn RecordStore,
    pub feeds: &'a dyn FeedSource,
    pub pages: &'a dyn PageImageScraper,
    pub image_search: Option<&'a dyn ImageSearch>,
    pub downloader: &'a dyn ImageDownloader,
}

/// Execute one run of the configured variant.
#[instrument(level = "info", skip_all, fields(variant = %config.variant.as_str(), dry_run = dry_run))]
pub async fn run(config: &BotConfig, services: &Services<'_>, dry_run: bool) -> RunReport {
    let mut record = services.store.load().await;
    info!(entries = record.len(), "Record loaded");

    match config.variant {
        Variant::Facts | Variant::Franchise => {
            run_facts(config, services, &mut record, dry_run).await
        }
        Variant::News => run_news(config, services, &mut record, dry_run).await,
    }
}

async fn run_facts(
    config: &BotConfig,
    services: &Services<'_>,
    record: &mut PostRecord,
    dry_run: bool,
) -> RunReport {
    let mut report = RunReport::default();
    let generation = &config.generation;
    let chain = FallbackChain::new(services.generator, config);

    let prompt = prompts::user_fact(
        &generation.topic,
        generation.char_budget,
        record.recent(generation.recent_window),
    );

    let (candidate, body) = {
        let seen: &PostRecord = record;
        let is_duplicate = |text: &str| {
            seen.contains(text) || seen.contains(&enforce_length(text, &config.hashtags, config.ceiling))
        };
        let candidate = chain
            .generate_or(&prompt, &is_duplicate, &generation.fallback_text)
            .await;
        if candidate.origin == Origin::Fallback && is_duplicate(&candidate.text) {
            warn!(
                text = %truncate_for_log(&candidate.text, 120),
                "Fallback text was already posted; nothing to publish this run"
            );
            report.skipped += 1;
            return report;
        }
        let body = enforce_length(&candidate.text, &config.hashtags, config.ceiling);
        (candidate, body)
    };
    debug!(origin = ?candidate.origin, body = %truncate_for_log(&body, 120), "Candidate ready");

    // text variants never require an image (rejected at config validation)
    let image = match config.image_policy {
        ImagePolicy::Optional => {
            ImageResolver::new(services.pages, services.image_search, services.downloader)
                .fetch_for_text(&body)
                .await
        }
        ImagePolicy::Required | ImagePolicy::Disabled => None,
    };

    let outcome = publish_and_record(config, services, record, &body, &body, image, dry_run).await;
    tally(&mut report, outcome, &body, config);
    report
}

async fn run_news(
    config: &BotConfig,
    services: &Services<'_>,
    record: &mut PostRecord,
    dry_run: bool,
) -> RunReport {
    let mut report = RunReport::default();
    let news = &config.news;
    let chain = FallbackChain::new(services.generator, config);
    let detector = SpeculationDetector::new(&news.speculative_markers);
    let resolver = ImageResolver::new(services.pages, services.image_search, services.downloader);
    let mut published = 0usize;

    'feeds: for feed in &news.feeds {
        let entries = match services.feeds.fetch(feed, news.entries_per_feed).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(%feed, error = %e, "Feed unavailable; moving on");
                continue;
            }
        };
        info!(%feed, count = entries.len(), "Fetched feed entries");

        for entry in entries {
            if !is_news(&entry, news) {
                debug!(title = %entry.title, "Not a news item; ignoring");
                continue;
            }
            if record.contains(&entry.link) {
                debug!(link = %entry.link, "Already posted");
                report.skipped += 1;
                continue;
            }
            if entry.title.trim().is_empty() {
                warn!(link = %entry.link, "Entry has no headline; skipping");
                report.skipped += 1;
                continue;
            }

            let body = news_body(config, &chain, &detector, &entry).await;

            let image = match config.image_policy {
                ImagePolicy::Disabled => None,
                ImagePolicy::Optional | ImagePolicy::Required => {
                    resolver.fetch_for_entry(&entry, &body).await
                }
            };
            if image.is_none() && config.image_policy == ImagePolicy::Required {
                warn!(link = %entry.link, "No usable image for entry; skipping");
                report.skipped += 1;
                continue;
            }

            let outcome =
                publish_and_record(config, services, record, &body, &entry.link, image, dry_run).await;
            let counted = matches!(outcome, PostOutcome::Published(_) | PostOutcome::DryRun);
            let failed = outcome == PostOutcome::Failed;
            tally(&mut report, outcome, &body, config);
            if failed {
                // a platform failure ends the run
                break 'feeds;
            }
            if !counted {
                continue;
            }
            published += 1;
            if published >= news.max_posts_per_run {
                break 'feeds;
            }
        }
    }

    if report.posted.is_empty() && report.failed == 0 {
        info!("No new news items to post");
    }
    report
}

/// Rewritten headline, prefixed when speculative, within the ceiling.
async fn news_body(
    config: &BotConfig,
    chain: &FallbackChain<'_>,
    detector: &SpeculationDetector,
    entry: &FeedEntry,
) -> String {
    let headline = collapse_whitespace(&entry.title);
    let summary = entry.summary.as_deref().map(html_to_text);
    let prompt = prompts::user_headline_rewrite(
        &headline,
        summary.as_deref(),
        config.generation.char_budget,
    );

    let rewritten = chain.generate_or(&prompt, &|_: &str| false, &headline).await;
    let prefix = config.news.speculative_prefix.trim();
    let text = if !prefix.is_empty()
        && detector.is_speculative(&headline)
        && !rewritten.text.starts_with(prefix)
    {
        format!("{prefix} {}", rewritten.text)
    } else {
        rewritten.text
    };
    enforce_length(&text, &config.hashtags, config.ceiling)
}

/// Publish `body` (plus hashtags) and, on success, append `entry` to the record.
///
/// The image file is removed whatever happens. An empty body is never posted.
async fn publish_and_record(
    config: &BotConfig,
    services: &Services<'_>,
    record: &mut PostRecord,
    body: &str,
    entry: &str,
    image: Option<DownloadedImage>,
    dry_run: bool,
) -> PostOutcome {
    if body.trim().is_empty() {
        warn!(%entry, "Nothing left to post after shaping; skipping");
        if let Some(image) = image {
            image.discard();
        }
        return PostOutcome::Skipped;
    }

    let text = compose_post(body, &config.hashtags, config.ceiling);

    if dry_run {
        info!(
            %text,
            chars = text.chars().count(),
            image = image.as_ref().map(|i| i.source_url.as_str()).unwrap_or("none"),
            "Dry run; not posting"
        );
        if let Some(image) = image {
            image.discard();
        }
        return PostOutcome::DryRun;
    }

    let result = publish(services.platform, &text, image.as_ref()).await;
    if let Some(image) = image {
        image.discard();
    }

    match result {
        Ok(post_id) => {
            match services.store.append(entry).await {
                Ok(updated) => *record = updated,
                Err(e) => {
                    // The post is live but the record is not; the next run may repeat it.
                    error!(error = %e, %entry, "Posted but failed to persist the record");
                    record.push(entry);
                }
            }
            info!(%post_id, "Published and recorded");
            PostOutcome::Published(post_id)
        }
        Err(e) => {
            error!(error = %e, "Publish failed; record unchanged");
            PostOutcome::Failed
        }
    }
}

fn tally(report: &mut RunReport, outcome: PostOutcome, body: &str, config: &BotConfig) {
    match outcome {
        PostOutcome::Published(_) | PostOutcome::DryRun => report
            .posted
            .push(compose_post(body, &config.hashtags, config.ceiling)),
        PostOutcome::Failed => report.failed += 1,
        PostOutcome::Skipped => report.skipped += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scripted::ScriptedGenerator;
    use crate::error::{FeedError, GenerationError};
    use crate::images::fakes::{FakeDownloader, FixedSearch, MapPages};
    use crate::publisher::recording::{FailAt, RecordingPlatform};
    use crate::record::memory::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct StaticFeeds(HashMap<String, Vec<FeedEntry>>);

    #[async_trait]
    impl FeedSource for StaticFeeds {
        async fn fetch(&self, url: &str, limit: usize) -> Result<Vec<FeedEntry>, FeedError> {
            match self.0.get(url) {
                Some(entries) => Ok(entries.iter().take(limit).cloned().collect()),
                None => Err(FeedError::Status(404)),
            }
        }
    }

    struct Harness {
        generator: ScriptedGenerator,
        platform: RecordingPlatform,
        store: MemoryStore,
        feeds: StaticFeeds,
        pages: MapPages,
        search: Option<FixedSearch>,
        downloader: FakeDownloader,
    }

    impl Harness {
        fn new(generator: ScriptedGenerator, record: &[&str]) -> Self {
            Self {
                generator,
                platform: RecordingPlatform::new(),
                store: MemoryStore::with(record),
                feeds: StaticFeeds::default(),
                pages: MapPages::default(),
                search: None,
                downloader: FakeDownloader::default(),
            }
        }

        fn services(&self) -> Services<'_> {
            Services {
                generator: &self.generator,
                platform: &self.platform,
                store: &self.store,
                feeds: &self.feeds,
                pages: &self.pages,
                image_search: self.search.as_ref().map(|s| s as &dyn ImageSearch),
                downloader: &self.downloader,
            }
        }

        async fn run(&self, config: &BotConfig, dry_run: bool) -> RunReport {
            run(config, &self.services(), dry_run).await
        }

        fn temp_files_left(&self) -> usize {
            self.downloader
                .paths
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.exists())
                .count()
        }
    }

    fn facts_config() -> BotConfig {
        let mut config = BotConfig::for_variant(Variant::Facts);
        config.generation.retry_delay_secs = 0;
        config
    }

    fn news_config() -> BotConfig {
        let mut config = BotConfig::for_variant(Variant::News);
        config.generation.retry_delay_secs = 0;
        config.news.feeds = vec!["feed://one".into()];
        config
    }

    fn news_entry(n: usize, media: Option<&str>) -> FeedEntry {
        FeedEntry {
            source: "feed://one".into(),
            title: format!("Studio announces season {n}"),
            link: format!("https://news.example.com/{n}"),
            tags: vec!["News".into()],
            media: media.map(|m| vec![m.to_string()]).unwrap_or_default(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_duplicate_generation_is_regenerated() {
        let h = Harness::new(ScriptedGenerator::ok(&["Fact A", "Fact B"]), &["Fact A"]);
        let report = h.run(&facts_config(), false).await;

        assert_eq!(h.platform.texts(), vec!["Fact B #AnimeFacts #Weeb #Otaku"]);
        assert_eq!(h.store.snapshot(), vec!["Fact A", "Fact B"]);
        assert_eq!(report.posted.len(), 1);
    }

    #[tokio::test]
    async fn test_total_generation_failure_posts_fallback() {
        let h = Harness::new(ScriptedGenerator::new(vec![]), &[]);
        let config = facts_config();
        h.run(&config, false).await;

        let fallback = config.generation.fallback_text.clone();
        assert_eq!(h.store.snapshot(), vec![fallback.clone()]);
        let posted = h.platform.texts();
        assert!(posted[0].starts_with(&fallback));
        assert!(posted[0].chars().count() <= config.ceiling);
        // two models, three attempts each
        assert_eq!(h.generator.calls(), 6);
    }

    #[tokio::test]
    async fn test_fallback_already_posted_is_skipped() {
        let config = facts_config();
        let fallback = config.generation.fallback_text.clone();
        let h = Harness::new(
            ScriptedGenerator::new(vec![Err(GenerationError::Auth("bad key".into()))]),
            &[fallback.as_str()],
        );
        let report = h.run(&config, false).await;

        assert!(h.platform.texts().is_empty());
        assert_eq!(h.store.snapshot(), vec![fallback]);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_long_fact_is_truncated_and_recorded_truncated() {
        let long = "X".repeat(300);
        let h = Harness::new(ScriptedGenerator::ok(&[long.as_str()]), &[]);
        let config = facts_config();
        h.run(&config, false).await;

        let posted = &h.platform.texts()[0];
        assert!(posted.chars().count() <= config.ceiling);
        assert!(posted.contains("..."));
        let recorded = &h.store.snapshot()[0];
        assert!(recorded.ends_with("..."));
        assert!(!recorded.contains('#'));
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_record_unchanged() {
        let mut h = Harness::new(ScriptedGenerator::ok(&["Fact B"]), &["Fact A"]);
        h.platform = RecordingPlatform::failing_at(FailAt::Post);
        let report = h.run(&facts_config(), false).await;

        assert_eq!(h.store.snapshot(), vec!["Fact A"]);
        assert_eq!(report.failed, 1);
        assert!(report.posted.is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_runs_append_in_order() {
        let config = facts_config();
        let h = Harness::new(ScriptedGenerator::ok(&["One", "Two", "Three"]), &["Zero"]);
        for _ in 0..3 {
            h.run(&config, false).await;
        }
        assert_eq!(h.store.snapshot(), vec!["Zero", "One", "Two", "Three"]);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let h = Harness::new(ScriptedGenerator::ok(&["Fact B"]), &["Fact A"]);
        let report = h.run(&facts_config(), true).await;

        assert!(h.platform.texts().is_empty());
        assert_eq!(h.store.snapshot(), vec!["Fact A"]);
        assert_eq!(report.posted, vec!["Fact B #AnimeFacts #Weeb #Otaku"]);
    }

    #[tokio::test]
    async fn test_optional_image_attached_when_search_hits() {
        let mut h = Harness::new(ScriptedGenerator::ok(&["Fact B"]), &[]);
        h.search = Some(FixedSearch(Some("https://img.example.com/b.png".into())));
        let mut config = facts_config();
        config.image_policy = ImagePolicy::Optional;
        h.run(&config, false).await;

        let posts = h.platform.posts.lock().unwrap().clone();
        assert_eq!(posts[0].1.as_deref(), Some("media-1"));
        assert_eq!(h.temp_files_left(), 0);
    }

    #[tokio::test]
    async fn test_optional_image_missing_posts_text_only() {
        let mut h = Harness::new(ScriptedGenerator::ok(&["Fact B"]), &[]);
        h.search = Some(FixedSearch(None));
        let mut config = facts_config();
        config.image_policy = ImagePolicy::Optional;
        h.run(&config, false).await;

        let posts = h.platform.posts.lock().unwrap().clone();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1, None);
    }

    #[tokio::test]
    async fn test_news_entry_without_image_is_skipped_and_next_tried() {
        let mut h = Harness::new(
            ScriptedGenerator::ok(&["Season one confirmed", "Season two confirmed"]),
            &[],
        );
        h.feeds.0.insert(
            "feed://one".into(),
            vec![
                news_entry(1, None),
                news_entry(2, Some("https://img.example.com/2.jpg")),
            ],
        );
        let report = h.run(&news_config(), false).await;

        assert_eq!(report.skipped, 1);
        assert_eq!(h.store.snapshot(), vec!["https://news.example.com/2"]);
        let posts = h.platform.posts.lock().unwrap().clone();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].0.starts_with("Season two confirmed"));
        assert_eq!(posts[0].1.as_deref(), Some("media-1"));
    }

    #[tokio::test]
    async fn test_news_skips_recorded_links_and_non_news() {
        let mut h = Harness::new(
            ScriptedGenerator::ok(&["Fresh item"]),
            &["https://news.example.com/1"],
        );
        let mut review = news_entry(2, Some("https://img.example.com/2.jpg"));
        review.tags = vec!["Review".into()];
        h.feeds.0.insert(
            "feed://one".into(),
            vec![
                news_entry(1, Some("https://img.example.com/1.jpg")),
                review,
                news_entry(3, Some("https://img.example.com/3.jpg")),
            ],
        );
        h.run(&news_config(), false).await;

        assert_eq!(
            h.store.snapshot(),
            vec!["https://news.example.com/1", "https://news.example.com/3"]
        );
    }

    #[tokio::test]
    async fn test_news_honours_max_posts_per_run() {
        let mut h = Harness::new(ScriptedGenerator::ok(&["a", "b", "c"]), &[]);
        h.feeds.0.insert(
            "feed://one".into(),
            (1..=3)
                .map(|n| news_entry(n, Some("https://img.example.com/x.jpg")))
                .collect(),
        );

        h.run(&news_config(), false).await;
        assert_eq!(h.store.snapshot().len(), 1);

        let mut config = news_config();
        config.news.max_posts_per_run = 5;
        h.run(&config, false).await;
        assert_eq!(
            h.store.snapshot(),
            vec![
                "https://news.example.com/1",
                "https://news.example.com/2",
                "https://news.example.com/3"
            ]
        );
    }

    #[tokio::test]
    async fn test_speculative_headline_gets_prefix() {
        let mut h = Harness::new(ScriptedGenerator::ok(&["A sequel may be in the works"]), &[]);
        let mut entry = news_entry(1, Some("https://img.example.com/1.jpg"));
        entry.title = "Sequel reportedly in production".into();
        h.feeds.0.insert("feed://one".into(), vec![entry]);
        h.run(&news_config(), false).await;

        assert!(h.platform.texts()[0].starts_with("RUMOR: A sequel may be in the works"));
    }

    #[tokio::test]
    async fn test_headline_rewrite_failure_uses_headline() {
        let mut h = Harness::new(ScriptedGenerator::new(vec![]), &[]);
        h.feeds.0.insert(
            "feed://one".into(),
            vec![news_entry(7, Some("https://img.example.com/7.jpg"))],
        );
        h.run(&news_config(), false).await;

        assert_eq!(
            h.platform.texts(),
            vec!["Studio announces season 7 #AnimeNews #Anime"]
        );
    }

    #[tokio::test]
    async fn test_temp_image_removed_after_failed_publish() {
        let mut h = Harness::new(ScriptedGenerator::ok(&["x", "y"]), &[]);
        h.platform = RecordingPlatform::failing_at(FailAt::Post);
        h.feeds.0.insert(
            "feed://one".into(),
            vec![
                news_entry(1, Some("https://img.example.com/1.jpg")),
                news_entry(2, Some("https://img.example.com/2.jpg")),
            ],
        );
        let report = h.run(&news_config(), false).await;

        assert_eq!(report.failed, 1);
        assert!(h.store.snapshot().is_empty());
        // uploaded file existed at upload time and is gone now
        assert!(h.platform.uploads.lock().unwrap()[0].1);
        assert_eq!(h.downloader.paths.lock().unwrap().len(), 1);
        assert_eq!(h.temp_files_left(), 0);
    }

    #[tokio::test]
    async fn test_page_image_used_when_entry_has_none() {
        let mut h = Harness::new(ScriptedGenerator::ok(&["Big news"]), &[]);
        h.pages.0.insert(
            "https://news.example.com/4".into(),
            "https://img.example.com/og.jpg".into(),
        );
        h.feeds.0.insert("feed://one".into(), vec![news_entry(4, None)]);
        h.run(&news_config(), false).await;

        assert_eq!(h.store.snapshot(), vec!["https://news.example.com/4"]);
        assert_eq!(h.temp_files_left(), 0);
    }

    #[tokio::test]
    async fn test_broken_media_falls_back_to_page_image() {
        let mut h = Harness::new(ScriptedGenerator::ok(&["Season one confirmed"]), &[]);
        h.downloader.failing = vec!["https://img.example.com/broken.jpg".into()];
        h.pages.0.insert(
            "https://news.example.com/1".into(),
            "https://img.example.com/og.jpg".into(),
        );
        h.feeds.0.insert(
            "feed://one".into(),
            vec![news_entry(1, Some("https://img.example.com/broken.jpg"))],
        );
        let report = h.run(&news_config(), false).await;

        assert_eq!(report.skipped, 0);
        assert_eq!(h.store.snapshot(), vec!["https://news.example.com/1"]);
        let posts = h.platform.posts.lock().unwrap().clone();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1.as_deref(), Some("media-1"));
        assert_eq!(h.temp_files_left(), 0);
    }

    #[tokio::test]
    async fn test_entry_without_headline_is_never_posted() {
        let mut h = Harness::new(ScriptedGenerator::new(vec![]), &[]);
        let mut untitled = news_entry(9, Some("https://img.example.com/9.jpg"));
        untitled.title = "  ".into();
        h.feeds.0.insert(
            "feed://one".into(),
            vec![untitled, news_entry(10, Some("https://img.example.com/10.jpg"))],
        );
        let report = h.run(&news_config(), false).await;

        assert_eq!(report.skipped, 1);
        assert_eq!(
            h.platform.texts(),
            vec!["Studio announces season 10 #AnimeNews #Anime"]
        );
        assert_eq!(h.store.snapshot(), vec!["https://news.example.com/10"]);
    }

    #[tokio::test]
    async fn test_empty_body_is_not_published() {
        let h = Harness::new(ScriptedGenerator::new(vec![]), &[]);
        let mut config = facts_config();
        config.generation.fallback_text = String::new();
        let report = h.run(&config, false).await;

        assert!(h.platform.texts().is_empty());
        assert!(h.store.snapshot().is_empty());
        assert_eq!(report.skipped, 1);
        assert!(report.posted.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_feed_is_skipped() {
        let mut h = Harness::new(ScriptedGenerator::ok(&["Next"]), &[]);
        h.feeds.0.insert(
            "feed://two".into(),
            vec![news_entry(9, Some("https://img.example.com/9.jpg"))],
        );
        let mut config = news_config();
        config.news.feeds = vec!["feed://missing".into(), "feed://two".into()];
        h.run(&config, false).await;

        assert_eq!(h.store.snapshot(), vec!["https://news.example.com/9"]);
    }
}
