//! Outcome evaluator

use kiln_core::ports::LanguageModel;
use kiln_core::{ChatMessage, Critique, Observation, Result, Task};
use std::sync::Arc;
use tracing::info;

use crate::verdict::parse_verdict;

const SYSTEM_PROMPT: &str = "\
You are an assistant that assesses my progress of playing Minecraft and \
provides useful guidance.

You are required to evaluate if I have met the task requirements. Exceeding \
the task requirements is also considered a success while failing to meet them \
requires you to provide critique to help me improve.

I will give you the current state of the world, the task and its context.

You should only respond in JSON format as described below:
{
    \"reasoning\": \"reasoning\",
    \"success\": boolean,
    \"critique\": \"critique\"
}
Ensure the response can be parsed by a JSON parser, e.g. no trailing commas, \
no single quotes.";

/// Judges whether an attempt satisfied its task
pub struct Critic {
    model: Arc<dyn LanguageModel>,
}

impl Critic {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Evaluate the observation produced by an attempt
    ///
    /// A reply that cannot be read as a verdict is fatal.
    pub async fn evaluate(&self, task: &Task, observation: &Observation) -> Result<Critique> {
        let reply = self.model.generate(&build_conversation(task, observation)).await?;
        let critique = parse_verdict(&reply)?;

        info!(
            "Critic verdict for {}: {}",
            task.command,
            if critique.success { "success" } else { "failure" }
        );
        Ok(critique)
    }
}

/// System and user messages for one evaluation
///
/// Execution errors and chat are left out: the critic judges the world
/// state, not the log.
pub fn build_conversation(task: &Task, observation: &Observation) -> Vec<ChatMessage> {
    let state = observation
        .to_string()
        .lines()
        .filter(|line| !line.starts_with("Execution error:") && !line.starts_with("Chat log:"))
        .collect::<Vec<_>>()
        .join("\n");

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "{}\nTask: {}\nContext:\n[{}]",
            state, task.command, task.context
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kiln_core::KilnError;

    struct Fixed(&'static str);

    #[async_trait]
    impl LanguageModel for Fixed {
        async fn generate(&self, _conversation: &[ChatMessage]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_conversation_hides_errors_and_chat() {
        let mut observation = Observation {
            biome: "forest".to_string(),
            ..Default::default()
        };
        observation.record_error("boom");
        observation.chat.push("hello".to_string());
        let task = Task::new("Mine 1 wood log", "").with_context("Trees nearby");

        let conversation = build_conversation(&task, &observation);
        let user = &conversation[1].content;
        assert!(user.contains("Biome: forest"));
        assert!(!user.contains("boom"));
        assert!(!user.contains("hello"));
        assert!(user.ends_with("Task: Mine 1 wood log\nContext:\n[Trees nearby]"));
    }

    #[tokio::test]
    async fn test_evaluate_success() {
        let critic = Critic::new(Arc::new(Fixed(r#"{"success": true, "critique": ""}"#)));
        let critique = critic
            .evaluate(&Task::new("Mine 1 wood log", ""), &Observation::default())
            .await
            .unwrap();
        assert!(critique.success);
    }

    #[tokio::test]
    async fn test_evaluate_malformed_is_fatal() {
        let critic = Critic::new(Arc::new(Fixed("Looks fine")));
        let result = critic
            .evaluate(&Task::new("Mine 1 wood log", ""), &Observation::default())
            .await;
        assert!(matches!(result, Err(KilnError::CritiqueParse(_))));
    }
}
