//! Configuration management for Kiln
//!
//! This module provides configuration structures for an agent run,
//! including loop limits, skill retrieval, QA caching, model selection and
//! the environment bridge.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{KilnError, ResetMode, ResetOptions, Result};

/// Agent configuration
///
/// Loaded from `.kiln/config.toml` in the working directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Control loop limits
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,

    /// Skill library retrieval
    #[serde(default)]
    pub skills: SkillSettings,

    /// Curriculum question answering
    #[serde(default)]
    pub qa: QaSettings,

    /// Model selection
    #[serde(default)]
    pub model: ModelSettings,

    /// Environment bridge
    #[serde(default)]
    pub environment: EnvironmentSettings,
}

/// Control loop parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Attempts allowed per task
    #[serde(default = "default_max_tries")]
    pub max_tries: usize,

    /// Keep the existing skill library instead of clearing it
    #[serde(default)]
    pub resume: bool,

    /// Stop after this many tasks (unlimited when unset)
    #[serde(default)]
    pub max_tasks: Option<usize>,
}

/// Skill retrieval parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSettings {
    /// Where the skill index is persisted
    #[serde(default = "default_skill_index_path")]
    pub index_path: PathBuf,

    /// Maximum skills returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum similarity for a skill to be returned
    #[serde(default = "default_skill_min_score")]
    pub min_score: f32,
}

/// QA context parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaSettings {
    /// Gather QA context for proposed tasks
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Where cached answers are persisted
    #[serde(default = "default_qa_cache_path")]
    pub cache_path: PathBuf,

    /// Minimum similarity for a cached answer to be reused
    #[serde(default = "default_qa_min_score")]
    pub min_score: f32,
}

/// Language model backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    Anthropic,
    Ollama,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub provider: ModelProvider,

    /// Provider-specific model name
    #[serde(default = "default_model")]
    pub name: String,

    /// Maximum tokens for each reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL for self-hosted providers
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
}

/// Environment bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    /// URL of the bridge server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Port of the game server the bot joins
    #[serde(default)]
    pub mc_port: Option<u16>,

    #[serde(default)]
    pub reset_mode: ResetMode,

    #[serde(default = "default_wait_ticks")]
    pub wait_ticks: u32,

    /// Timeout for a single bridge request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default value providers
fn default_max_tries() -> usize {
    5
}

fn default_skill_index_path() -> PathBuf {
    PathBuf::from(".kiln/skills.json")
}

fn default_top_k() -> usize {
    5
}

fn default_skill_min_score() -> f32 {
    0.05
}

fn default_true() -> bool {
    true
}

fn default_qa_cache_path() -> PathBuf {
    PathBuf::from(".kiln/qa_cache.json")
}

fn default_qa_min_score() -> f32 {
    0.9
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> usize {
    4096
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_wait_ticks() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    600
}

impl KilnConfig {
    /// Load configuration from `.kiln/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".kiln/config.toml");

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| KilnError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.kiln/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(".kiln");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| KilnError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject values the control loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.loop_settings.max_tries == 0 {
            return Err(KilnError::Config("loop.max_tries must be at least 1".to_string()));
        }
        if self.skills.top_k == 0 {
            return Err(KilnError::Config("skills.top_k must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Reset options derived from the environment section
    pub fn reset_options(&self) -> ResetOptions {
        ResetOptions {
            mode: self.environment.reset_mode,
            mc_port: self.environment.mc_port,
            wait_ticks: self.environment.wait_ticks,
            ..ResetOptions::default()
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_tries: default_max_tries(),
            resume: false,
            max_tasks: None,
        }
    }
}

impl Default for SkillSettings {
    fn default() -> Self {
        Self {
            index_path: default_skill_index_path(),
            top_k: default_top_k(),
            min_score: default_skill_min_score(),
        }
    }
}

impl Default for QaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_path: default_qa_cache_path(),
            min_score: default_qa_min_score(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: ModelProvider::default(),
            name: default_model(),
            max_tokens: default_max_tokens(),
            api_key_env: default_api_key_env(),
            base_url: default_ollama_url(),
        }
    }
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            mc_port: None,
            reset_mode: ResetMode::Hard,
            wait_ticks: default_wait_ticks(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
