//! Completed and failed task history

use kiln_core::Task;
use serde::{Deserialize, Serialize};

/// Two insertion-ordered task lists keyed by command
///
/// A command is never in both lists: adding it to one removes it from the
/// other. Re-adding a task to the list it is already in moves it to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistory {
    completed: Vec<Task>,
    failed: Vec<Task>,
}

impl TaskHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_completed(&mut self, task: Task) {
        self.failed.retain(|t| t.id() != task.id());
        self.completed.retain(|t| t.id() != task.id());
        self.completed.push(task);
    }

    pub fn add_failed(&mut self, task: Task) {
        self.completed.retain(|t| t.id() != task.id());
        self.failed.retain(|t| t.id() != task.id());
        self.failed.push(task);
    }

    pub fn completed(&self) -> &[Task] {
        &self.completed
    }

    pub fn failed(&self) -> &[Task] {
        &self.failed
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.iter().any(|t| t.id() == id)
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.failed.iter().any(|t| t.id() == id)
    }

    /// Prompt lines listing both sets
    pub fn render(&self) -> String {
        let join = |tasks: &[Task]| {
            if tasks.is_empty() {
                "None".to_string()
            } else {
                tasks.iter().map(|t| t.command.as_str()).collect::<Vec<_>>().join(", ")
            }
        };
        format!(
            "Completed tasks so far: {}\nFailed tasks that are too hard: {}",
            join(&self.completed),
            join(&self.failed)
        )
    }
}
