//! Question answering context for proposed tasks
//!
//! The model asks itself questions about the current observation, answers
//! them, and the pairs become the supporting context of the next task.
//! Answers are cached by question similarity.

use kiln_core::ports::{IndexDocument, LanguageModel, SimilarityIndex};
use kiln_core::{ChatMessage, Observation, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::parser::parse_questions;

const QUESTION_PROMPT: &str = "\
You are a helpful assistant that asks questions to help me decide the next \
immediate task to do in Minecraft. My ultimate goal is to discover as many \
things as possible, accomplish as many tasks as possible and become the best \
Minecraft player in the world.

I will give you the current state of the world. Ask at most 5 questions, each \
about a single concept.

You should only respond in the format as described below:
Reasoning: ...
Question 1: ...
Concept 1: ...
Question 2: ...
Concept 2: ...";

const ANSWER_PROMPT: &str = "\
You are a helpful assistant that answers my question about Minecraft. \
Answer in at most three sentences. If you do not know the answer, say so.";

/// One question and its answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaEntry {
    pub question: String,
    pub answer: String,
}

/// Render entries as prompt context
pub fn render_entries(entries: &[QaEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("Question: {}\nAnswer: {}", e.question, e.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Generates and caches QA context
pub struct QaService {
    model: Arc<dyn LanguageModel>,
    cache: Arc<dyn SimilarityIndex>,
    min_score: f32,
}

impl QaService {
    pub fn new(model: Arc<dyn LanguageModel>, cache: Arc<dyn SimilarityIndex>, min_score: f32) -> Self {
        Self {
            model,
            cache,
            min_score,
        }
    }

    /// Questions and answers relevant to an observation
    pub async fn context_for(&self, observation: &Observation) -> Result<Vec<QaEntry>> {
        let questions = self.questions(observation).await?;
        let mut entries = Vec::with_capacity(questions.len());
        for question in questions {
            let answer = self.answer(&question).await?;
            entries.push(QaEntry { question, answer });
        }
        Ok(entries)
    }

    pub async fn questions(&self, observation: &Observation) -> Result<Vec<String>> {
        let reply = self
            .model
            .generate(&[
                ChatMessage::system(QUESTION_PROMPT),
                ChatMessage::user(observation.to_string()),
            ])
            .await?;
        let questions = parse_questions(&reply);
        debug!("Model asked {} questions", questions.len());
        Ok(questions)
    }

    /// Answer a question, from the cache when a close enough one was seen
    pub async fn answer(&self, question: &str) -> Result<String> {
        if let Some(hit) = self.cache.query(question, 1).await?.into_iter().next() {
            if hit.score >= self.min_score {
                debug!("QA cache hit for {:?} ({:.2})", question, hit.score);
                return Ok(hit.document.payload);
            }
        }

        let answer = self
            .model
            .generate(&[
                ChatMessage::system(ANSWER_PROMPT),
                ChatMessage::user(format!("Question: {}", question)),
            ])
            .await?
            .trim()
            .to_string();

        self.cache
            .add(vec![IndexDocument::new(question, question, answer.clone())])
            .await?;
        Ok(answer)
    }
}
