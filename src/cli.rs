//! Command-line interface definitions.
//!
//! Secrets are regular options backed by environment variables so the bot
//! can be driven entirely from a `.env` file under a scheduler.

use crate::config::Variant;
use clap::Parser;

/// Post one anime fact or news item to X/Twitter and exit.
///
/// # Examples
///
/// ```sh
/// # Generic anime fact, secrets from .env
/// anime_post_bot
///
/// # News variant with overrides from a YAML file
/// anime_post_bot --variant news --config bot.yaml
///
/// # Run everything except the actual post
/// anime_post_bot --variant franchise --dry-run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Content source to post from
    #[arg(short, long, value_enum, default_value = "facts")]
    pub variant: Variant,

    /// Optional path to a YAML file overriding the variant defaults
    #[arg(short, long)]
    pub config: Option<String>,

    /// Path of the JSON record of published items
    #[arg(short, long)]
    pub record_file: Option<String>,

    /// Maximum number of news items to publish in this run
    #[arg(long)]
    pub max_posts: Option<usize>,

    /// Build the post but log it instead of publishing; the record is left untouched
    #[arg(long)]
    pub dry_run: bool,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// X/Twitter consumer key
    #[arg(long, env = "TWITTER_API_KEY", hide_env_values = true)]
    pub twitter_api_key: Option<String>,

    /// X/Twitter consumer secret
    #[arg(long, env = "TWITTER_API_SECRET", hide_env_values = true)]
    pub twitter_api_secret: Option<String>,

    /// X/Twitter access token
    #[arg(long, env = "TWITTER_ACCESS_TOKEN", hide_env_values = true)]
    pub twitter_access_token: Option<String>,

    /// X/Twitter access token secret
    #[arg(long, env = "TWITTER_ACCESS_SECRET", hide_env_values = true)]
    pub twitter_access_secret: Option<String>,

    /// Google Custom Search API key (image search)
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// Google Custom Search engine id (image search)
    #[arg(long, env = "GOOGLE_CSE_ID")]
    pub google_cse_id: Option<String>,
}
