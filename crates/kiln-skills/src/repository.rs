//! Skill repository: durable, searchable store of successful code units
//!
//! The similarity index is the single source of truth. Each stored document
//! uses the skill name as id, the description as searchable text and the
//! whole skill as JSON payload.

use async_trait::async_trait;
use kiln_core::config::SkillSettings;
use kiln_core::ports::{IndexDocument, SimilarityIndex};
use kiln_core::{KilnError, Result, Skill, Task};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::term_index::TermIndex;

/// Opens the backing index on first use
#[async_trait]
pub trait IndexLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn SimilarityIndex>>;
}

/// Loads a [`TermIndex`] from a JSON file
pub struct TermIndexLoader {
    path: PathBuf,
}

impl TermIndexLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IndexLoader for TermIndexLoader {
    async fn load(&self) -> Result<Arc<dyn SimilarityIndex>> {
        Ok(Arc::new(TermIndex::open(&self.path).await?))
    }
}

/// Hands out an index that already exists
pub struct ExistingIndex(pub Arc<dyn SimilarityIndex>);

#[async_trait]
impl IndexLoader for ExistingIndex {
    async fn load(&self) -> Result<Arc<dyn SimilarityIndex>> {
        Ok(self.0.clone())
    }
}

/// Persistent skill library
pub struct SkillRepository {
    loader: Box<dyn IndexLoader>,
    index: OnceCell<Arc<dyn SimilarityIndex>>,
    /// Serialises writes so the count check sees only its own insert
    writes: Mutex<()>,
    top_k: usize,
    min_score: f32,
    strict: bool,
}

impl SkillRepository {
    pub fn new(loader: Box<dyn IndexLoader>, top_k: usize, min_score: f32) -> Self {
        Self {
            loader,
            index: OnceCell::new(),
            writes: Mutex::new(()),
            top_k,
            min_score,
            strict: true,
        }
    }

    /// Repository over the configured on-disk index
    ///
    /// Unless `resume` is set the library starts empty.
    pub async fn open(settings: &SkillSettings, resume: bool) -> Result<Self> {
        let repository = Self::new(
            Box::new(TermIndexLoader::new(&settings.index_path)),
            settings.top_k,
            settings.min_score,
        );

        if resume {
            let count = repository.count().await?;
            info!("Resuming with {} stored skills", count);
        } else {
            repository.clear().await?;
        }
        Ok(repository)
    }

    /// Disable the post-write count check
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// The backing index, initialised exactly once
    async fn index(&self) -> Result<&Arc<dyn SimilarityIndex>> {
        self.index
            .get_or_try_init(|| async {
                debug!("Initialising skill index");
                self.loader.load().await
            })
            .await
    }

    /// Store a skill, replacing any skill with the same name
    pub async fn add(&self, skill: &Skill) -> Result<()> {
        if skill.name.trim().is_empty() {
            return Err(KilnError::SkillRepository("skill name is empty".to_string()));
        }
        if skill.description.trim().is_empty() {
            return Err(KilnError::SkillRepository(format!(
                "skill {} has an empty description",
                skill.name
            )));
        }

        let index = self.index().await?;
        let _write = self.writes.lock().await;
        let existed = index.contains(&skill.name).await?;
        let before = index.count().await?;

        let payload = serde_json::to_string(skill)?;
        index
            .add(vec![IndexDocument::new(
                skill.name.clone(),
                skill.description.clone(),
                payload,
            )])
            .await?;

        let after = index.count().await?;
        let expected = if existed { before } else { before + 1 };
        if after != expected {
            if self.strict {
                return Err(KilnError::SkillRepository(format!(
                    "index out of sync after adding {}: expected {} skills, found {}",
                    skill.name, expected, after
                )));
            }
            warn!(
                "Index out of sync after adding {}: expected {}, found {}",
                skill.name, expected, after
            );
        }

        if existed {
            info!("Replaced skill {}", skill.name);
        } else {
            info!("Added skill {} ({} stored)", skill.name, after);
        }
        Ok(())
    }

    /// Skills most similar to `text`, best first
    ///
    /// Matches below the similarity threshold are dropped; an empty library
    /// yields an empty list.
    pub async fn query_text(&self, text: &str) -> Result<Vec<Skill>> {
        let index = self.index().await?;
        let matches = index.query(text, self.top_k).await?;

        let mut skills = Vec::with_capacity(matches.len());
        for scored in matches {
            if scored.score < self.min_score {
                continue;
            }
            skills.push(decode(&scored.document)?);
        }
        debug!("Retrieved {} skills for query", skills.len());
        Ok(skills)
    }

    /// Skills relevant to a task
    pub async fn query(&self, task: &Task) -> Result<Vec<Skill>> {
        self.query_text(&task.query_text()).await
    }

    /// Every stored skill, sorted by name
    pub async fn list(&self) -> Result<Vec<Skill>> {
        let index = self.index().await?;
        let mut skills = index
            .documents()
            .await?
            .iter()
            .map(decode)
            .collect::<Result<Vec<_>>>()?;
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(skills)
    }

    pub async fn count(&self) -> Result<usize> {
        self.index().await?.count().await
    }

    /// Delete every stored skill
    pub async fn clear(&self) -> Result<()> {
        let index = self.index().await?;
        let _write = self.writes.lock().await;
        index.clear().await?;
        info!("Cleared skill library");
        Ok(())
    }
}

fn decode(document: &IndexDocument) -> Result<Skill> {
    serde_json::from_str(&document.payload).map_err(|e| {
        KilnError::SkillRepository(format!("corrupt skill record {}: {}", document.id, e))
    })
}
