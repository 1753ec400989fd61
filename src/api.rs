//! Text-generation capability.
//!
//! [`TextGenerator`] is the seam the pipeline talks to; [`OpenAiClient`] is
//! the production implementation against an OpenAI-compatible
//! chat-completions endpoint. Failures are collapsed into the three
//! [`GenerationError`] categories so callers never see provider specifics.

use crate::error::GenerationError;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model identifier, e.g. `gpt-4o-mini`.
    pub model: String,
    /// Single user-turn prompt.
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Anything that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `request`.
    ///
    /// # Errors
    ///
    /// Returns a categorized [`GenerationError`]; an empty completion is a
    /// [`GenerationError::Provider`].
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat-completions client.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiClient {
    /// Build a client with a fixed per-call timeout.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("anime_post_bot/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    #[instrument(level = "info", skip_all, fields(model = %request.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let t0 = Instant::now();
        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err = GenerationError::from_status(status.as_u16(), &truncate_for_log(&text, 300));
            warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %err, "Completion call failed");
            return Err(err);
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Provider(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            chars = content.chars().count(),
            "Completion received"
        );

        if content.is_empty() {
            return Err(GenerationError::Provider("empty completion".into()));
        }
        Ok(content)
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Generator that replays a fixed script of outcomes and records every request.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedGenerator {
        script: Mutex<VecDeque<Result<String, GenerationError>>>,
        pub(crate) requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedGenerator {
        pub(crate) fn new(script: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn ok(texts: &[&str]) -> Self {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub(crate) fn models(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.model.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
            self.requests.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Provider("script exhausted".into())))
        }
    }
}
