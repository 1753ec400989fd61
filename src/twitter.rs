//! X/Twitter client: v1.1 media upload and v2 post creation, both signed
//! with OAuth 1.0a user context.

use crate::config::TwitterCredentials;
use crate::error::PublishError;
use crate::oauth::{Nonce, authorization_header};
use crate::publisher::SocialPlatform;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const TWEETS_URL: &str = "https://api.twitter.com/2/tweets";
const MEDIA_UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";

#[derive(Serialize)]
struct CreateTweet<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<TweetMedia<'a>>,
}

#[derive(Serialize)]
struct TweetMedia<'a> {
    media_ids: [&'a str; 1],
}

#[derive(Deserialize)]
struct CreateTweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

#[derive(Deserialize)]
struct MediaUploadResponse {
    media_id_string: String,
}

pub struct TwitterClient {
    http: reqwest::Client,
    credentials: TwitterCredentials,
}

impl fmt::Debug for TwitterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterClient").finish_non_exhaustive()
    }
}

impl TwitterClient {
    pub fn new(credentials: TwitterCredentials, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("anime_post_bot/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http, credentials })
    }

    fn sign(&self, method: &str, url: &str) -> String {
        authorization_header(&self.credentials, method, url, &[], &Nonce::fresh())
    }

    /// Turn a response into its body, or a categorized error.
    async fn body_of(resp: reqwest::Response) -> Result<String, PublishError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            warn!(
                status = status.as_u16(),
                body = %truncate_for_log(&body, 300),
                "Platform returned non-success"
            );
            return Err(PublishError::from_status(status.as_u16(), &body));
        }
        Ok(body)
    }
}

fn tweet_body<'a>(text: &'a str, media_id: Option<&'a str>) -> CreateTweet<'a> {
    CreateTweet {
        text,
        media: media_id.map(|id| TweetMedia { media_ids: [id] }),
    }
}

fn parse_tweet_id(body: &str) -> Result<String, PublishError> {
    serde_json::from_str::<CreateTweetResponse>(body)
        .map(|r| r.data.id)
        .map_err(|e| PublishError::Api(format!("unexpected create-post response: {e}")))
}

fn parse_media_id(body: &str) -> Result<String, PublishError> {
    serde_json::from_str::<MediaUploadResponse>(body)
        .map(|r| r.media_id_string)
        .map_err(|e| PublishError::Api(format!("unexpected media-upload response: {e}")))
}

#[async_trait]
impl SocialPlatform for TwitterClient {
    #[instrument(level = "info", skip(self), fields(path = %path.display()))]
    async fn upload_media(&self, path: &Path, mime: &str) -> Result<String, PublishError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        debug!(bytes = bytes.len(), %file_name, "Uploading media");

        let part = Part::bytes(bytes).file_name(file_name).mime_str(mime)?;
        let form = Form::new().part("media", part);

        let resp = self
            .http
            .post(MEDIA_UPLOAD_URL)
            .header(AUTHORIZATION, self.sign("POST", MEDIA_UPLOAD_URL))
            .multipart(form)
            .send()
            .await?;
        parse_media_id(&Self::body_of(resp).await?)
    }

    #[instrument(level = "info", skip(self, text), fields(chars = text.chars().count()))]
    async fn create_post(&self, text: &str, media_id: Option<&str>) -> Result<String, PublishError> {
        let resp = self
            .http
            .post(TWEETS_URL)
            .header(AUTHORIZATION, self.sign("POST", TWEETS_URL))
            .json(&tweet_body(text, media_id))
            .send()
            .await?;
        parse_tweet_id(&Self::body_of(resp).await?)
    }
}
