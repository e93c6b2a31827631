//! Remote summarizer using OpenAI-compatible APIs
//!
//! Implements the [`Summarizer`] trait for remote chat-completion endpoints
//! via HTTP. Supports any OpenAI-compatible endpoint with configurable URL,
//! model, and API key via environment variable.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RemoteSummarizerConfig;
use crate::consolidation::prompts::consolidation_prompt;
use crate::consolidation::summarizer::{Summarizer, SummarizerError};
use crate::memory::types::Turn;

/// Attempts per request, including the first
const MAX_ATTEMPTS: u32 = 3;

/// Remote summarizer using OpenAI-compatible HTTP APIs
#[derive(Debug)]
pub struct RemoteSummarizer {
    client: Client,
    config: RemoteSummarizerConfig,
    api_key: String,
    initial_backoff: Duration,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl RemoteSummarizer {
    /// Create a new remote summarizer with the given configuration
    ///
    /// Reads the API key from the environment variable named by
    /// `config.api_key_env`. Returns an error if it is not set or no
    /// endpoint is configured.
    pub fn new(config: &RemoteSummarizerConfig) -> Result<Self, SummarizerError> {
        if config.api_url.trim().is_empty() {
            return Err(SummarizerError::ConfigError(
                "consolidation.remote.api_url is not set".to_string(),
            ));
        }

        let api_key = env::var(&config.api_key_env).map_err(|_| {
            SummarizerError::ConfigError(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SummarizerError::ApiError(e.to_string()))?;

        info!(
            "Remote summarizer ready (model {}, endpoint {})",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
            initial_backoff: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay (doubled on each retry)
    pub fn with_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Call the remote API, backing off exponentially on 429 and transport errors
    async fn call_api(&self, prompt: &str) -> Result<String, SummarizerError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You condense conversations into durable memory.".to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.2,
            max_tokens: 1024,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        debug!("Requesting consolidation from {}", url);

        let mut last_error = None;
        let mut delay = self.initial_backoff;

        for attempt in 0..MAX_ATTEMPTS {
            match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(format!("rate limited ({status})"));
                        if attempt + 1 < MAX_ATTEMPTS {
                            warn!(
                                "Summarizer endpoint rate limited (attempt {}/{}), backing off {:?}",
                                attempt + 1,
                                MAX_ATTEMPTS,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            delay *= 2;
                        }
                        continue;
                    }

                    if !status.is_success() {
                        let body = response
                            .text()
                            .await
                            .unwrap_or_default();
                        return Err(SummarizerError::ApiError(format!(
                            "endpoint returned {status}: {body}"
                        )));
                    }

                    let completion: ChatCompletionResponse = response
                        .json()
                        .await
                        .map_err(|e| SummarizerError::ParseError(e.to_string()))?;

                    return completion
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| SummarizerError::ApiError("Empty response".to_string()));
                }
                Err(e) => {
                    let reason = e.to_string();
                    last_error = Some(reason.clone());
                    if attempt + 1 < MAX_ATTEMPTS {
                        warn!(
                            "Summarizer request failed (attempt {}/{}): {}",
                            attempt + 1,
                            MAX_ATTEMPTS,
                            reason
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(SummarizerError::Unavailable(format!(
            "Failed after {} attempts: {}",
            MAX_ATTEMPTS,
            last_error.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }
}

#[async_trait]
impl Summarizer for RemoteSummarizer {
    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizerError> {
        let prompt = consolidation_prompt(turns);
        let response = self.call_api(&prompt).await?;
        debug!("Summarizer response: {}", response);
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
