//! Social platform seam.
//!
//! [`SocialPlatform`] is what the pipeline publishes through; the X/Twitter
//! client in [`crate::twitter`] is the production implementation.

use crate::error::PublishError;
use crate::images::DownloadedImage;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, instrument};

#[async_trait]
pub trait SocialPlatform: Send + Sync {
    /// Upload a local media file, returning the platform's media id.
    async fn upload_media(&self, path: &Path, mime: &str) -> Result<String, PublishError>;

    /// Create a post, optionally attaching an uploaded media id. Returns the post id.
    async fn create_post(&self, text: &str, media_id: Option<&str>) -> Result<String, PublishError>;
}

/// Upload the image (if any), then create the post.
///
/// The image file is left alone; the caller owns its cleanup.
#[instrument(level = "info", skip_all, fields(text = %truncate_for_log(text, 80), with_image = image.is_some()))]
pub async fn publish(
    platform: &dyn SocialPlatform,
    text: &str,
    image: Option<&DownloadedImage>,
) -> Result<String, PublishError> {
    let media_id = match image {
        Some(image) => {
            let id = platform.upload_media(image.path(), &image.mime).await?;
            info!(media_id = %id, source_url = %image.source_url, "Uploaded media");
            Some(id)
        }
        None => None,
    };
    let post_id = platform.create_post(text, media_id.as_deref()).await?;
    info!(%post_id, "Post created");
    Ok(post_id)
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::Mutex;

    /// Which call a [`RecordingPlatform`] should refuse.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum FailAt {
        Never,
        Upload,
        Post,
    }

    /// Platform double that remembers what it was asked to do.
    pub(crate) struct RecordingPlatform {
        pub(crate) fail_at: FailAt,
        pub(crate) uploads: Mutex<Vec<(std::path::PathBuf, bool)>>,
        pub(crate) posts: Mutex<Vec<(String, Option<String>)>>,
    }

    impl RecordingPlatform {
        pub(crate) fn new() -> Self {
            Self::failing_at(FailAt::Never)
        }

        pub(crate) fn failing_at(fail_at: FailAt) -> Self {
            Self {
                fail_at,
                uploads: Mutex::new(Vec::new()),
                posts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn texts(&self) -> Vec<String> {
            self.posts.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl SocialPlatform for RecordingPlatform {
        async fn upload_media(&self, path: &Path, _mime: &str) -> Result<String, PublishError> {
            // remember whether the file really existed at upload time
            self.uploads
                .lock()
                .unwrap()
                .push((path.to_path_buf(), path.exists()));
            if self.fail_at == FailAt::Upload {
                return Err(PublishError::from_status(413, "media too large"));
            }
            Ok(format!("media-{}", self.uploads.lock().unwrap().len()))
        }

        async fn create_post(&self, text: &str, media_id: Option<&str>) -> Result<String, PublishError> {
            if self.fail_at == FailAt::Post {
                return Err(PublishError::from_status(429, "too many requests"));
            }
            let mut posts = self.posts.lock().unwrap();
            posts.push((text.to_string(), media_id.map(str::to_string)));
            Ok(format!("post-{}", posts.len()))
        }
    }
}
