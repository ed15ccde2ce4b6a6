//! # kiln-agent
//!
//! Language model backends and code synthesis for Kiln.
//!
//! - Anthropic and Ollama implementations of the generation port, each with
//!   its own circuit breaker
//! - The code synthesis parser that turns a model reply into an invocable
//!   [`kiln_core::CodeUnit`]
//! - The code synthesizer that prompts for code attempts

mod anthropic;
mod auth;
mod circuit_breaker;
pub mod code_parser;
mod ollama;
mod synthesizer;
mod types;

use std::sync::Arc;

use kiln_core::config::{ModelProvider, ModelSettings};
use kiln_core::ports::LanguageModel;
use kiln_core::Result;

pub use anthropic::{AnthropicClient, RetryPolicy};
pub use auth::api_key_from_env;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use code_parser::{parse_code_unit, FunctionDef, SynthesisFailure};
pub use ollama::OllamaClient;
pub use synthesizer::{build_conversation, CodeSynthesizer, SynthesisRequest};
pub use types::Usage;

/// Build the configured generation backend
pub fn build_model(settings: &ModelSettings) -> Result<Arc<dyn LanguageModel>> {
    tracing::info!("Using {:?} model {}", settings.provider, settings.name);
    Ok(match settings.provider {
        ModelProvider::Anthropic => Arc::new(AnthropicClient::from_settings(settings)?),
        ModelProvider::Ollama => Arc::new(OllamaClient::from_settings(settings)?),
    })
}
