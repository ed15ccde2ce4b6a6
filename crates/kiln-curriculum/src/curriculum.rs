//! Task proposer

use kiln_core::ports::LanguageModel;
use kiln_core::{ChatMessage, Observation, Result, Task};
use std::sync::Arc;
use tracing::info;

use crate::history::TaskHistory;
use crate::parser::parse_task;
use crate::qa::{render_entries, QaService};

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant that tells me the next immediate task to do in \
Minecraft. My ultimate goal is to discover as many diverse things as possible, \
accomplish as many diverse tasks as possible and become the best Minecraft \
player in the world.

I will give you the questions and answers gathered so far, the current state \
of the world, and the tasks I have completed or failed.

1) Propose the next task so that I steadily learn new skills.
2) The task should be a single phrase following a concise format, such as \
\"Mine [quantity] [block]\", \"Craft [quantity] [item]\", \"Smelt [quantity] [item]\", \
\"Kill [quantity] [mob]\", \"Cook [quantity] [food]\", \"Equip [item]\".
3) Do not propose a task I have already completed unless I need it again.
4) Avoid tasks listed as failed until I have acquired what they need.

You should only respond in the format as described below:
Reasoning: ...
Task: ...";

/// Proposes tasks and owns the task history
pub struct Curriculum {
    model: Arc<dyn LanguageModel>,
    qa: Option<QaService>,
    history: TaskHistory,
}

impl Curriculum {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            qa: None,
            history: TaskHistory::new(),
        }
    }

    /// Gather QA context before each proposal
    pub fn with_qa(mut self, qa: QaService) -> Self {
        self.qa = Some(qa);
        self
    }

    /// Start from an existing history (resumed runs)
    pub fn with_history(mut self, history: TaskHistory) -> Self {
        self.history = history;
        self
    }

    /// Propose the next task for the current world state
    ///
    /// A reply without a usable `Task:` line is fatal.
    pub async fn next_task(&self, observation: &Observation) -> Result<Task> {
        let context = match &self.qa {
            Some(qa) => render_entries(&qa.context_for(observation).await?),
            None => String::new(),
        };

        let conversation = build_conversation(&context, observation, &self.history);
        let reply = self.model.generate(&conversation).await?;
        let task = parse_task(&reply)?.with_context(context);

        info!("Proposed task: {}", task.command);
        Ok(task)
    }

    pub fn add_completed(&mut self, task: Task) {
        self.history.add_completed(task);
    }

    pub fn add_failed(&mut self, task: Task) {
        self.history.add_failed(task);
    }

    pub fn history(&self) -> &TaskHistory {
        &self.history
    }
}

/// System and user messages for one proposal
pub fn build_conversation(
    context: &str,
    observation: &Observation,
    history: &TaskHistory,
) -> Vec<ChatMessage> {
    let context = if context.trim().is_empty() {
        "No questions asked yet."
    } else {
        context
    };

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "{}\n\n{}\n\n{}",
            context,
            observation,
            history.render()
        )),
    ]
}
