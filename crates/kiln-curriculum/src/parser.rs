//! Line-oriented parsers for curriculum replies

use kiln_core::{KilnError, Result, Task};
use regex::Regex;
use std::sync::OnceLock;

fn reasoning_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*Reasoning\s*:\s*(.*?)\s*$").expect("reasoning pattern is valid"))
}

fn task_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*Task\s*:\s*(.*?)\s*$").expect("task pattern is valid"))
}

fn question_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*Question\s*\d+\s*:\s*(.+?)\s*$").expect("question pattern is valid")
    })
}

/// Parse a task proposal of the form
///
/// ```text
/// Reasoning: I have logs but no planks.
/// Task: Craft 4 oak planks
/// ```
///
/// The last matching line of each kind wins. A missing or empty `Task:`
/// line is a [`KilnError::TaskProposal`].
pub fn parse_task(text: &str) -> Result<Task> {
    let mut reasoning = String::new();
    let mut command = String::new();

    for line in text.lines() {
        if let Some(caps) = reasoning_line().captures(line) {
            reasoning = caps[1].to_string();
        }
        if let Some(caps) = task_line().captures(line) {
            command = caps[1].trim_end_matches('.').trim().to_string();
        }
    }

    if command.is_empty() {
        return Err(KilnError::TaskProposal(format!(
            "no `Task:` line in reply: {}",
            preview(text)
        )));
    }
    Ok(Task::new(command, reasoning))
}

/// Questions from lines like `Question 1: How do I get iron?`
pub fn parse_questions(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| question_line().captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX {
        trimmed.to_string()
    } else {
        format!("{}...", trimmed.chars().take(MAX).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task() {
        let task = parse_task(
            "Reasoning: Based on the inventory I need a pickaxe.\nTask: Craft 1 wooden pickaxe.\n",
        )
        .unwrap();
        assert_eq!(task.command, "Craft 1 wooden pickaxe");
        assert_eq!(task.reasoning, "Based on the inventory I need a pickaxe.");
        assert!(task.context.is_empty());
    }

    #[test]
    fn test_parse_task_without_reasoning() {
        let task = parse_task("  Task:   Mine 1 wood log  ").unwrap();
        assert_eq!(task.command, "Mine 1 wood log");
        assert_eq!(task.reasoning, "");
    }

    #[test]
    fn test_missing_task_is_error() {
        let result = parse_task("Reasoning: I am not sure.\nI would explore.");
        assert!(matches!(result, Err(KilnError::TaskProposal(_))));

        let result = parse_task("Task:   ");
        assert!(matches!(result, Err(KilnError::TaskProposal(_))));
    }

    #[test]
    fn test_parse_questions() {
        let questions = parse_questions(
            "Reasoning: forest biome\nQuestion 1: How can I obtain more oak logs?\nConcept 1: oak_log\n  Question 2:  What mobs live in forests? \nQuestion: unnumbered",
        );
        assert_eq!(
            questions,
            vec![
                "How can I obtain more oak logs?".to_string(),
                "What mobs live in forests?".to_string(),
            ]
        );
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        assert!(preview(&long).ends_with("..."));
        assert_eq!(preview(" short "), "short");
    }
}
