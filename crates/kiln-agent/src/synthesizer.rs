//! Code synthesizer: asks the model for code and hands the reply to the parser

use std::sync::Arc;

use kiln_core::ports::LanguageModel;
use kiln_core::{ChatMessage, CodeUnit, Critique, Observation, Result, Skill, Task};

use crate::code_parser::{parse_code_unit, SynthesisFailure};

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant that writes Mineflayer javascript code to complete \
any Minecraft task specified by me.

Here are some useful programs written with Mineflayer APIs:

{programs}

At each round of conversation, I will give you
Code from the last round: ...
Observation: ...
Task: ...
Context: ...
Critique: ...

You should then respond to me with
Explain: Are there any steps missing in your plan? Why does the code not complete the task?
Plan: How to complete the task step by step.
Code:
    1) Write an async function taking the bot as the only argument.
    2) Reuse the above useful programs as much as possible.
    3) Helper functions go before the main function, which must be declared last.
    4) Do not write infinite loops or recursive functions.
    5) Do not use eval or construct functions from strings.
    6) Name your function in a meaningful way.

Put all code in a single ```javascript code block.";

/// Everything the model sees for one attempt
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub task: &'a Task,
    /// Skills retrieved for this task
    pub skills: &'a [Skill],
    /// Unit produced by the previous attempt, if any
    pub previous: Option<&'a CodeUnit>,
    pub observation: &'a Observation,
    /// Critique of the previous attempt, if any
    pub critique: Option<&'a Critique>,
}

/// Drives the generation port for code attempts
pub struct CodeSynthesizer {
    model: Arc<dyn LanguageModel>,
}

impl CodeSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Generate one candidate code unit
    ///
    /// The outer `Result` carries fatal generation-port errors; the inner one
    /// carries retryable parse failures.
    pub async fn generate(
        &self,
        request: &SynthesisRequest<'_>,
    ) -> Result<std::result::Result<CodeUnit, SynthesisFailure>> {
        let conversation = build_conversation(request);
        let reply = self.model.generate(&conversation).await?;

        let parsed = parse_code_unit(&reply);
        match &parsed {
            Ok(unit) => tracing::debug!("Synthesized entry function {}", unit.entry),
            Err(failure) => tracing::info!("Synthesis produced no unit: {}", failure),
        }
        Ok(parsed)
    }
}

/// System and user messages for one attempt
pub fn build_conversation(request: &SynthesisRequest<'_>) -> Vec<ChatMessage> {
    let programs = request
        .skills
        .iter()
        .map(|s| s.code.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n");

    let previous = request
        .previous
        .map(|unit| unit.program())
        .unwrap_or_else(|| "No code in the first round".to_string());

    let critique = request
        .critique
        .map(|c| c.description.as_str())
        .unwrap_or("");

    let user = format!(
        "Code from the last round:\n{}\n\n{}\n\nTask: {}\nContext:\n[{}]\nCritique: {}",
        previous, request.observation, request.task.command, request.task.context, critique
    );

    vec![
        ChatMessage::system(SYSTEM_PROMPT.replace("{programs}", &programs)),
        ChatMessage::user(user),
    ]
}
