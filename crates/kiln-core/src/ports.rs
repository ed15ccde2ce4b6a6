//! Port traits for the capabilities Kiln consumes but does not implement
//!
//! Each port has one implementation per backend, chosen when the agent is
//! assembled and injected as a trait object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ChatMessage, CodeUnit, Observation, ResetOptions, Result, Skill};

/// Text generation capability (the language model)
///
/// Used identically by the curriculum, the code synthesizer, the critic and
/// the skill describer, each with their own prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a reply to a conversation
    async fn generate(&self, conversation: &[ChatMessage]) -> Result<String>;
}

/// The live world a code unit runs in
#[async_trait]
pub trait Environment: Send {
    /// Reset the world and return the first observation
    async fn reset(&mut self, options: &ResetOptions) -> Result<Observation>;

    /// Run a code unit with the given helper skills available
    ///
    /// Must not be called before `reset`.
    async fn step(&mut self, unit: &CodeUnit, helpers: &[Skill]) -> Result<Observation>;

    /// Release the environment
    async fn close(&mut self) -> Result<()>;
}

/// Builds a fresh environment for each agent run
pub trait EnvironmentFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Environment>>;
}

/// A document stored in a similarity index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Unique identifier
    pub id: String,
    /// Text that similarity is computed against
    pub text: String,
    /// Opaque payload returned with matches
    pub payload: String,
}

impl IndexDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            payload: payload.into(),
        }
    }
}

/// A query match with its similarity score in `[0, 1]` (higher is closer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: IndexDocument,
    pub score: f32,
}

/// Similarity-search capability backing the skill library and the QA cache
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Insert documents, replacing any with the same id
    async fn add(&self, documents: Vec<IndexDocument>) -> Result<()>;

    /// Up to `k` documents ordered by descending similarity to `text`
    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredDocument>>;

    /// Number of stored documents
    async fn count(&self) -> Result<usize>;

    /// Whether a document with this id exists
    async fn contains(&self, id: &str) -> Result<bool>;

    /// Every stored document
    async fn documents(&self) -> Result<Vec<IndexDocument>>;

    /// Delete every stored document
    async fn clear(&self) -> Result<()>;
}
