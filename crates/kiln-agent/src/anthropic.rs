//! Anthropic Messages API backend for the generation port

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{AnthropicRequest, AnthropicResponse};
use async_trait::async_trait;
use kiln_core::config::ModelSettings;
use kiln_core::ports::LanguageModel;
use kiln_core::{ChatMessage, KilnError, Result};
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Retry configuration for rate limits and server errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Language model client for the Anthropic API
///
/// Every call is stateless: the whole conversation is sent each time.
#[derive(Debug)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: usize,
    url: String,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl AnthropicClient {
    /// Create a client from model settings, reading the key from the environment
    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        let api_key = auth::api_key_from_env(&settings.api_key_env)?;
        Self::new(api_key, settings.name.clone(), settings.max_tokens)
    }

    pub fn new(api_key: String, model: String, max_tokens: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| KilnError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            model,
            max_tokens,
            url: ANTHROPIC_API_URL.to_string(),
            retry: RetryPolicy::default(),
            breaker: CircuitBreaker::default(),
        })
    }

    /// Point the client at another endpoint (proxies, tests)
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &AnthropicRequest) -> Result<String> {
        if let Err(remaining) = self.breaker.check() {
            return Err(KilnError::ApiLimit(format!(
                "Circuit breaker is OPEN - too many API failures. Wait {} seconds before retry.",
                remaining.as_secs()
            )));
        }

        let mut retries = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            tracing::debug!("Sending request to Anthropic API (attempt {})", retries + 1);

            let response = self
                .http
                .post(&self.url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    self.breaker.record_failure();
                    KilnError::Api(format!("Failed to send request: {}", e))
                })?;

            let status = response.status();

            if status.as_u16() == 429 {
                retries += 1;
                if retries > self.retry.max_retries {
                    let error_text = response.text().await.unwrap_or_else(|_| "Unknown".to_string());
                    return Err(KilnError::ApiLimit(format!(
                        "Rate limit exceeded after {} retries. Last error: {}",
                        self.retry.max_retries, error_text
                    )));
                }

                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);

                tracing::warn!(
                    "Rate limited (429). Waiting {}s before retry {}/{}",
                    wait.as_secs(),
                    retries,
                    self.retry.max_retries
                );
                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(self.retry.max_backoff);
                continue;
            }

            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_else(|_| "Unknown".to_string());

                if status.is_server_error() && retries < self.retry.max_retries {
                    retries += 1;
                    tracing::warn!(
                        "Server error ({}). Waiting {}s before retry {}/{}",
                        status,
                        backoff.as_secs(),
                        retries,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.retry.max_backoff);
                    continue;
                }

                self.breaker.record_failure();
                tracing::error!(
                    "Circuit breaker: recorded failure (count: {})",
                    self.breaker.failure_count()
                );
                return Err(KilnError::Api(format!(
                    "Anthropic API error {}: {}",
                    status, error_text
                )));
            }

            let parsed: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| KilnError::Api(format!("Failed to parse response: {}", e)))?;

            self.breaker.record_success();

            let output = parsed
                .text()
                .ok_or_else(|| KilnError::Api("No text content in response".to_string()))?;

            match parsed.usage {
                Some(usage) => tracing::debug!(
                    "Generation complete ({} chars, {} input tokens, {} output tokens)",
                    output.len(),
                    usage.input_tokens,
                    usage.output_tokens
                ),
                None => tracing::debug!("Generation complete ({} chars)", output.len()),
            }

            return Ok(output);
        }
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn generate(&self, conversation: &[ChatMessage]) -> Result<String> {
        let request = AnthropicRequest::from_conversation(&self.model, self.max_tokens, conversation);
        self.send(&request).await
    }
}
