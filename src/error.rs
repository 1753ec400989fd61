//! Error taxonomy for the bot.
//!
//! Only [`ConfigError`] is ever fatal. Everything else is caught by the
//! pipeline, logged, and turned into "do nothing this run".

use thiserror::Error;

/// Startup configuration problems. Raised before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set (add it to the environment or .env file)")]
    MissingSecret(&'static str),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure categories of the text-generation capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("authentication rejected by provider: {0}")]
    Auth(String),

    #[error("rate limited by provider: {0}")]
    RateLimit(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl GenerationError {
    /// Auth failures will not heal by retrying, so the whole fallback chain stops.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, GenerationError::Auth(_))
    }

    /// Map an HTTP status and body from the provider into a category.
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = format!("HTTP {status}: {body}");
        match status {
            401 | 403 => GenerationError::Auth(msg),
            429 => GenerationError::RateLimit(msg),
            _ => GenerationError::Provider(msg),
        }
    }
}

/// Failure categories of the social platform.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("platform rejected credentials: {0}")]
    Auth(String),

    #[error("platform rate limit hit: {0}")]
    RateLimit(String),

    #[error("network failure talking to platform: {0}")]
    Network(#[from] reqwest::Error),

    #[error("platform error: {0}")]
    Api(String),

    #[error("failed to read media file: {0}")]
    Media(#[from] std::io::Error),
}

impl PublishError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = format!("HTTP {status}: {body}");
        match status {
            401 | 403 => PublishError::Auth(msg),
            429 => PublishError::RateLimit(msg),
            _ => PublishError::Api(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned HTTP {0}")]
    Status(u16),

    #[error("feed could not be parsed: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image request returned HTTP {0}")]
    Status(u16),

    #[error("resource is not an image (content-type {0:?})")]
    NotAnImage(String),

    #[error("image is {0} bytes, over the upload limit")]
    TooLarge(usize),

    #[error("failed to write temporary image file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("record could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}
