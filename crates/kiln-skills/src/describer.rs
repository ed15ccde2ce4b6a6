//! Natural-language descriptions for new skills

use kiln_core::ports::LanguageModel;
use kiln_core::{ChatMessage, CodeUnit, Result};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant that writes a description of the given function \
written in Mineflayer javascript code.

1) Do not mention the function name.
2) Do not mention anything about `bot.chat` or helper functions.
3) There might be some helper functions before the main function, but you \
only need to describe the main function.
4) Try to summarize the function in no more than 6 sentences.
5) Your response should be a single line of text.";

/// Asks the model to summarise a code unit
pub struct SkillDescriber {
    model: Arc<dyn LanguageModel>,
}

impl SkillDescriber {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Describe the unit's entry function
    ///
    /// Never returns an empty string: a blank reply falls back to a
    /// placeholder naming the skill.
    pub async fn describe(&self, unit: &CodeUnit) -> Result<String> {
        let conversation = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "{}\n\nThe main function is `{}`.",
                unit.body, unit.entry
            )),
        ];

        let reply = self.model.generate(&conversation).await?;
        let description = reply.split_whitespace().collect::<Vec<_>>().join(" ");

        if description.is_empty() {
            tracing::warn!("Empty description for {}, using placeholder", unit.entry);
            Ok(format!("Skill {}.", unit.entry))
        } else {
            Ok(description)
        }
    }
}
