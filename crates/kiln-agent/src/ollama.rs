//! Local Ollama backend for the generation port

use crate::circuit_breaker::CircuitBreaker;
use crate::types::{OllamaChatRequest, OllamaChatResponse, OllamaOptions};
use async_trait::async_trait;
use kiln_core::config::ModelSettings;
use kiln_core::ports::LanguageModel;
use kiln_core::{ChatMessage, KilnError, Result};

/// Language model client for an Ollama server (`/api/chat`)
#[derive(Debug)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    breaker: CircuitBreaker,
}

impl OllamaClient {
    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        Self::new(&settings.base_url, &settings.name, settings.max_tokens)
    }

    pub fn new(base_url: &str, model: &str, max_tokens: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| KilnError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_tokens,
            temperature: 0.0,
            breaker: CircuitBreaker::default(),
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, conversation: &[ChatMessage]) -> Result<String> {
        if let Err(remaining) = self.breaker.check() {
            return Err(KilnError::ApiLimit(format!(
                "Ollama circuit breaker is OPEN. Wait {} seconds before retry.",
                remaining.as_secs()
            )));
        }

        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: conversation.to_vec(),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .http
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                self.breaker.record_failure();
                KilnError::Api(format!("Failed to send request to Ollama: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            self.breaker.record_failure();
            return Err(KilnError::Api(format!("Ollama error {}: {}", status, body)));
        }

        let result: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| KilnError::Api(format!("Failed to parse Ollama response: {}", e)))?;

        self.breaker.record_success();
        tracing::debug!("Ollama generation complete ({} chars)", result.message.content.len());
        Ok(result.message.content.trim().to_string())
    }
}
