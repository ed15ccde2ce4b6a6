//! Bag-of-words similarity index persisted as a JSON file
//!
//! Scores are cosine similarities of term-frequency vectors, so they fall in
//! `[0, 1]`. Every mutation is written through to disk.

use async_trait::async_trait;
use kiln_core::ports::{IndexDocument, ScoredDocument, SimilarityIndex};
use kiln_core::{KilnError, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Lowercased alphanumeric terms, with camelCase split apart
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in text.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
            prev_lower = c.is_lowercase() || c.is_numeric();
            current.extend(c.to_lowercase());
        } else {
            prev_lower = false;
            if !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}

fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut tf = HashMap::new();
    for term in tokenize(text) {
        *tf.entry(term).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of two sparse term vectors
pub fn cosine_similarity(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f32 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm_a: f32 = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// JSON-file backed [`SimilarityIndex`]
pub struct TermIndex {
    /// `None` keeps the index in memory only
    path: Option<PathBuf>,
    documents: RwLock<BTreeMap<String, IndexDocument>>,
}

impl TermIndex {
    /// Open the index at `path`, loading any documents already there
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let documents = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let list: Vec<IndexDocument> = serde_json::from_str(&content).map_err(|e| {
                KilnError::Index(format!("Corrupt index file {}: {}", path.display(), e))
            })?;
            info!("Loaded {} documents from {}", list.len(), path.display());
            list.into_iter().map(|d| (d.id.clone(), d)).collect()
        } else {
            debug!("Index file {} does not exist yet", path.display());
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path),
            documents: RwLock::new(documents),
        })
    }

    /// An index that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, documents: &BTreeMap<String, IndexDocument>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let list: Vec<&IndexDocument> = documents.values().collect();
        let content = serde_json::to_string_pretty(&list)?;

        // Atomic replace
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SimilarityIndex for TermIndex {
    async fn add(&self, documents: Vec<IndexDocument>) -> Result<()> {
        let mut stored = self.documents.write().await;
        let mut next = stored.clone();
        for document in documents {
            next.insert(document.id.clone(), document);
        }
        // Memory only changes once the file does
        self.persist(&next).await?;
        *stored = next;
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        let stored = self.documents.read().await;
        if stored.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = term_frequencies(text);
        let mut scored: Vec<ScoredDocument> = stored
            .values()
            .map(|document| ScoredDocument {
                score: cosine_similarity(&query, &term_frequencies(&document.text)),
                document: document.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.documents.read().await.len())
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.documents.read().await.contains_key(id))
    }

    async fn documents(&self) -> Result<Vec<IndexDocument>> {
        Ok(self.documents.read().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut stored = self.documents.write().await;
        self.persist(&BTreeMap::new()).await?;
        stored.clear();
        Ok(())
    }
}
