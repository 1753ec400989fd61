//! Runtime configuration.
//!
//! Two layers:
//! - [`Secrets`]: credentials read from the environment (via the CLI's
//!   `env =` options). A missing required value is the only fatal error.
//! - [`BotConfig`]: behaviour knobs with per-[`Variant`] defaults that an
//!   optional YAML file can override key by key.

use crate::cli::Cli;
use crate::error::ConfigError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Which content source the bot runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Generated facts about any anime or manga.
    Facts,
    /// Generated facts about a single franchise.
    Franchise,
    /// Rewritten headlines from anime news feeds.
    News,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Facts => "facts",
            Variant::Franchise => "franchise",
            Variant::News => "news",
        }
    }
}

/// Whether a post needs an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePolicy {
    /// Skip the candidate when no image resolves.
    Required,
    /// Attach an image when one resolves, otherwise post text only.
    Optional,
    /// Never look for an image.
    Disabled,
}

/// OAuth 1.0a user-context credentials for the platform.
#[derive(Clone)]
pub struct TwitterCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl std::fmt::Debug for TwitterCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitterCredentials")
            .field("consumer_key", &"<redacted>")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Custom Search credentials for image lookup.
#[derive(Debug, Clone)]
pub struct ImageSearchCredentials {
    pub api_key: String,
    pub engine_id: String,
}

/// All secrets the bot needs, validated at startup.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub openai_api_key: String,
    pub twitter: TwitterCredentials,
    pub image_search: Option<ImageSearchCredentials>,
}

fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::MissingSecret(name)),
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Secrets {
    /// Validate the secret options collected by the CLI.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let openai_api_key = required(&cli.openai_api_key, "OPENAI_API_KEY")?;
        let twitter = TwitterCredentials {
            consumer_key: required(&cli.twitter_api_key, "TWITTER_API_KEY")?,
            consumer_secret: required(&cli.twitter_api_secret, "TWITTER_API_SECRET")?,
            access_token: required(&cli.twitter_access_token, "TWITTER_ACCESS_TOKEN")?,
            access_secret: required(&cli.twitter_access_secret, "TWITTER_ACCESS_SECRET")?,
        };
        let image_search = match (optional(&cli.google_api_key), optional(&cli.google_cse_id)) {
            (Some(api_key), Some(engine_id)) => Some(ImageSearchCredentials { api_key, engine_id }),
            _ => None,
        };
        Ok(Self {
            openai_api_key,
            twitter,
            image_search,
        })
    }
}

/// Text generation knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Model fallback chain, tried in order.
    pub models: Vec<String>,
    /// Attempts per model.
    pub max_retries: usize,
    pub retry_delay_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    /// How many recent record entries go into the prompt.
    pub recent_window: usize,
    /// Character budget asked for in the prompt.
    pub char_budget: usize,
    /// Topic constraint for the fact variants.
    pub topic: String,
    /// Returned when every model and retry fails.
    pub fallback_text: String,
    pub api_base: String,
}

/// News variant knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSettings {
    pub feeds: Vec<String>,
    pub entries_per_feed: usize,
    /// Title words that mark an untagged entry as non-news.
    pub non_news_keywords: Vec<String>,
    /// Tag terms that mark a tagged entry as news.
    pub news_tags: Vec<String>,
    /// Title words that mark a headline as speculative.
    pub speculative_markers: Vec<String>,
    pub speculative_prefix: String,
    pub max_posts_per_run: usize,
}

/// Everything that shapes one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub variant: Variant,
    pub record_file: String,
    pub hashtags: String,
    /// Hard character limit of the platform.
    pub ceiling: usize,
    pub image_policy: ImagePolicy,
    pub http_timeout_secs: u64,
    pub generation: GenerationSettings,
    pub news: NewsSettings,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl BotConfig {
    /// Built-in defaults for a variant.
    pub fn for_variant(variant: Variant) -> Self {
        let generation = GenerationSettings {
            models: strings(&["gpt-4o-mini", "gpt-3.5-turbo"]),
            max_retries: 3,
            retry_delay_secs: 5,
            max_tokens: 100,
            temperature: 0.8,
            recent_window: 200,
            char_budget: 240,
            topic: "any anime or manga (not limited to Naruto or Boruto)".to_string(),
            fallback_text: "Did you know? The first anime ever created was 'Namakura Gatana' in 1917, making anime over a century old!".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
        };
        let news = NewsSettings {
            feeds: strings(&[
                "https://www.animenewsnetwork.com/all/rss.xml?ann-edition=us",
                "https://myanimelist.net/rss/news.xml",
            ]),
            entries_per_feed: 5,
            non_news_keywords: strings(&[
                "review", "episode", "podcast", "quiz", "poll", "giveaway", "contest",
                "ranking", "top 10", "opinion", "column", "forum", "answerman",
                "this week in", "preview guide", "recap",
            ]),
            news_tags: strings(&["news", "announcement", "industry"]),
            speculative_markers: strings(&[
                "rumor", "rumour", "reportedly", "leak", "allegedly", "unconfirmed",
                "could", "might", "possibly", "speculat",
            ]),
            speculative_prefix: "RUMOR:".to_string(),
            max_posts_per_run: 1,
        };
        let base = Self {
            variant,
            record_file: "facts.json".to_string(),
            hashtags: "#AnimeFacts #Weeb #Otaku".to_string(),
            ceiling: 280,
            image_policy: ImagePolicy::Disabled,
            http_timeout_secs: 30,
            generation,
            news,
        };

        match variant {
            Variant::Facts => base,
            Variant::Franchise => Self {
                record_file: "naruto_facts.json".to_string(),
                hashtags: "#Naruto #Boruto #AnimeFacts".to_string(),
                generation: GenerationSettings {
                    topic: "the Naruto or Boruto anime and manga".to_string(),
                    fallback_text: "Did you know? Naruto's name comes from narutomaki, the swirled fish cake topping found in ramen!".to_string(),
                    ..base.generation
                },
                ..base
            },
            Variant::News => Self {
                record_file: "posted_news.json".to_string(),
                hashtags: "#AnimeNews #Anime".to_string(),
                image_policy: ImagePolicy::Required,
                generation: GenerationSettings {
                    max_tokens: 120,
                    temperature: 0.7,
                    fallback_text: String::new(),
                    ..base.generation
                },
                ..base
            },
        }
    }

    /// Variant defaults, overridden by an optional YAML file and CLI flags.
    #[instrument(level = "info", skip(cli), fields(variant = %cli.variant.as_str()))]
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match cli.config.as_deref() {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_string(),
                    source,
                })?;
                let config = Self::from_yaml(cli.variant, &raw).map_err(|source| {
                    ConfigError::Parse {
                        path: path.to_string(),
                        source,
                    }
                })?;
                info!(path, "Loaded config overrides");
                config
            }
            None => Self::for_variant(cli.variant),
        };

        if let Some(ref record_file) = cli.record_file {
            config.record_file = record_file.clone();
        }
        if let Some(max_posts) = cli.max_posts {
            config.news.max_posts_per_run = max_posts;
        }

        config.validate()?;
        debug!(?config, "Effective configuration");
        Ok(config)
    }

    /// Overlay a YAML document onto the defaults for `variant`.
    pub fn from_yaml(variant: Variant, raw: &str) -> Result<Self, serde_yaml::Error> {
        let mut base = serde_yaml::to_value(Self::for_variant(variant))?;
        let overlay: Value = serde_yaml::from_str(raw)?;
        merge_yaml(&mut base, overlay);
        // The variant is chosen on the command line, never by the file.
        if let Value::Mapping(ref mut map) = base {
            map.insert(
                Value::String("variant".into()),
                serde_yaml::to_value(variant)?,
            );
        }
        serde_yaml::from_value(base)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ceiling < 20 {
            return Err(ConfigError::Invalid(format!(
                "ceiling must be at least 20 characters, got {}",
                self.ceiling
            )));
        }
        if self.generation.models.is_empty() {
            return Err(ConfigError::Invalid(
                "generation.models must list at least one model".into(),
            ));
        }
        if self.generation.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "generation.max_retries must be at least 1".into(),
            ));
        }
        if self.variant == Variant::News {
            if self.news.feeds.is_empty() {
                return Err(ConfigError::Invalid(
                    "news.feeds must list at least one feed".into(),
                ));
            }
            if self.news.entries_per_feed == 0 || self.news.max_posts_per_run == 0 {
                return Err(ConfigError::Invalid(
                    "news.entries_per_feed and news.max_posts_per_run must be at least 1".into(),
                ));
            }
        } else {
            if self.generation.fallback_text.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "generation.fallback_text must not be empty".into(),
                ));
            }
            if self.image_policy == ImagePolicy::Required {
                return Err(ConfigError::Invalid(format!(
                    "image_policy \"required\" is only valid for the news variant, not {}",
                    self.variant.as_str()
                )));
            }
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.generation.retry_delay_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Recursively merge `overlay` into `base`; mappings merge, everything else replaces.
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (slot, value) => *slot = value,
    }
}
