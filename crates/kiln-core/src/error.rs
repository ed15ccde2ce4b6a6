//! Unified error types for Kiln

use thiserror::Error;

/// Unified error type for all Kiln operations
///
/// Only fatal conditions live here. A critique that reports failure or a
/// model reply without usable code is an ordinary retry, not an error.
#[derive(Error, Debug)]
pub enum KilnError {
    // Curriculum errors
    #[error("Task proposal failed: {0}")]
    TaskProposal(String),

    // Critic errors
    #[error("Critique parse failed: {0}")]
    CritiqueParse(String),

    // Environment errors
    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Environment not ready: {0}")]
    EnvironmentNotReady(String),

    // Language model errors
    #[error("API error: {0}")]
    Api(String),

    #[error("API limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Skill library errors
    #[error("Skill repository error: {0}")]
    SkillRepository(String),

    #[error("Similarity index error: {0}")]
    Index(String),

    // Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl KilnError {
    /// Pipeline stage that raised this error, for operator diagnostics
    pub fn stage(&self) -> &'static str {
        match self {
            Self::TaskProposal(_) => "curriculum",
            Self::CritiqueParse(_) => "critic",
            Self::Environment(_) | Self::EnvironmentNotReady(_) => "environment",
            Self::Api(_) | Self::ApiLimit(_) | Self::Auth(_) => "llm",
            Self::SkillRepository(_) | Self::Index(_) => "skills",
            Self::Config(_) => "config",
            Self::Io(_) | Self::Serialization(_) => "io",
            Self::Other(_) => "unknown",
        }
    }
}

/// Result type alias using KilnError
pub type Result<T> = std::result::Result<T, KilnError>;
