//! Resilient candidate generation.
//!
//! [`FallbackChain`] walks an ordered list of models. Each model gets a
//! fixed number of attempts with a fixed delay after a failed call. An
//! authentication failure ends the whole chain, since no other model on
//! the same account will fare better. Completions the caller flags as
//! duplicates consume an attempt but do not sleep.
//!
//! # Retry Strategy
//!
//! - `max_retries` attempts per model, models tried in configured order
//! - constant `retry_delay` between failed calls (no backoff, no jitter)
//! - no delay after the final attempt of a model

use crate::api::{CompletionRequest, TextGenerator};
use crate::config::BotConfig;
use crate::utils::{collapse_whitespace, strip_wrapping_quotes, truncate_for_log};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Where a generated text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Produced by the named model.
    Model(String),
    /// The chain was exhausted and the caller's fallback was used.
    Fallback,
}

/// A generated candidate text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub origin: Origin,
}

/// Ordered model fallback chain with fixed-delay retries.
pub struct FallbackChain<'a> {
    generator: &'a dyn TextGenerator,
    models: Vec<String>,
    max_retries: usize,
    retry_delay: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl fmt::Debug for FallbackChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackChain")
            .field("models", &self.models)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl<'a> FallbackChain<'a> {
    pub fn new(generator: &'a dyn TextGenerator, config: &BotConfig) -> Self {
        Self {
            generator,
            models: config.generation.models.clone(),
            max_retries: config.generation.max_retries,
            retry_delay: config.retry_delay(),
            max_tokens: config.generation.max_tokens,
            temperature: config.generation.temperature,
        }
    }

    /// Run the chain until a completion passes `is_duplicate`.
    ///
    /// Returns `None` once every model and attempt is spent, or as soon as
    /// the provider rejects the credentials.
    #[instrument(level = "info", skip_all)]
    pub async fn generate(
        &self,
        prompt: &str,
        is_duplicate: &(dyn Fn(&str) -> bool + Sync),
    ) -> Option<Generation> {
        let total_t0 = Instant::now();

        'chain: for model in &self.models {
            let request = CompletionRequest {
                model: model.clone(),
                prompt: prompt.to_string(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            };

            for attempt in 1..=self.max_retries {
                match self.generator.complete(&request).await {
                    Ok(raw) => {
                        let text = collapse_whitespace(strip_wrapping_quotes(&raw));
                        if text.is_empty() {
                            warn!(%model, attempt, "Completion was empty after cleanup; retrying");
                            continue;
                        }
                        if is_duplicate(&text) {
                            warn!(
                                %model,
                                attempt,
                                text = %truncate_for_log(&text, 120),
                                "Completion already posted; retrying"
                            );
                            continue;
                        }
                        info!(
                            %model,
                            attempt,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            "Generated candidate"
                        );
                        return Some(Generation {
                            text,
                            origin: Origin::Model(model.clone()),
                        });
                    }
                    Err(e) if !e.is_retriable() => {
                        error!(%model, attempt, error = %e, "Non-retriable generation failure; abandoning model chain");
                        break 'chain;
                    }
                    Err(e) => {
                        warn!(
                            %model,
                            attempt,
                            max = self.max_retries,
                            error = %e,
                            "Generation attempt failed"
                        );
                        if attempt < self.max_retries {
                            sleep(self.retry_delay).await;
                        }
                    }
                }
            }
            warn!(%model, "Model exhausted its attempts; trying next model");
        }

        error!(
            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
            "Failed to generate with all models"
        );
        None
    }

    /// Like [`generate`](Self::generate) but never empty: falls back to `fallback`.
    pub async fn generate_or(
        &self,
        prompt: &str,
        is_duplicate: &(dyn Fn(&str) -> bool + Sync),
        fallback: &str,
    ) -> Generation {
        match self.generate(prompt, is_duplicate).await {
            Some(generation) => generation,
            None => {
                warn!(fallback = %truncate_for_log(fallback, 120), "Using fallback text");
                Generation {
                    text: fallback.trim().to_string(),
                    origin: Origin::Fallback,
                }
            }
        }
    }
}
