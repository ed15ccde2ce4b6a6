//! Activity Logger - Human-readable run logging to `.kiln/activity.md`
//!
//! Records what the agent did, one section per task:
//! - Run starts
//! - Task proposals
//! - Each attempt with its critique and a preview of the generated code
//! - Task outcomes and fatal halts

use chrono::Utc;
use kiln_core::fail_open::fail_open;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::progress::{AttemptReport, TaskOutcome};

/// Maximum character length for generated code in the activity log preview
const ACTIVITY_LOG_PREVIEW_CHARS: usize = 500;

/// Activity logger for agent runs
pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    /// Create a new activity logger writing into `kiln_dir`
    pub fn new(kiln_dir: PathBuf) -> Self {
        Self {
            output_path: kiln_dir.join("activity.md"),
        }
    }

    /// Log the start of a run, replacing any previous log
    ///
    /// This operation is fail-open - logging failures won't stop the agent
    pub async fn log_run_start(&self, max_tries: usize, resumed: bool) {
        fail_open("activity_logger::log_run_start", || async {
            if let Some(parent) = self.output_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let content = format!(
                "# Kiln Activity Log\n\n**Started**: {}\n**Max Tries**: {}\n**Resumed**: {}\n\n---\n\n",
                timestamp,
                max_tries,
                if resumed { "yes" } else { "no" }
            );

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.output_path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;

            Ok(())
        })
        .await;
    }

    /// Log a newly proposed task
    pub async fn log_task_start(&self, task: &str, reasoning: &str) {
        fail_open("activity_logger::log_task_start", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let content = format!(
                "## Task: {}\n**Time**: {}\n**Reasoning**: {}\n\n",
                task, timestamp, reasoning
            );
            self.append_internal(&content).await
        })
        .await;
    }

    /// Log one attempt
    pub async fn log_attempt(&self, report: &AttemptReport) {
        fail_open("activity_logger::log_attempt", || async {
            let mut content = format!(
                "### Attempt {}/{}\n**Result**: {}\n",
                report.attempt,
                report.max_tries,
                if report.success { "✓ success" } else { "✗ failure" }
            );

            if let Some(entry) = &report.entry {
                content.push_str(&format!("**Entry**: `{}`\n", entry));
            }
            if !report.critique.is_empty() {
                content.push_str(&format!("**Critique**: {}\n", report.critique));
            }
            content.push('\n');

            if let Some(code) = &report.code {
                content.push_str("```javascript\n");
                content.push_str(&preview(code));
                content.push_str("\n```\n\n");
            }

            if !report.observation.errors.is_empty() {
                content.push_str("**Errors**:\n");
                for error in &report.observation.errors {
                    content.push_str(&format!("- {}\n", error));
                }
                content.push('\n');
            }

            self.append_internal(&content).await
        })
        .await;
    }

    /// Log the terminal outcome of a task
    pub async fn log_task_finished(&self, task: &str, outcome: TaskOutcome, attempts: usize) {
        fail_open("activity_logger::log_task_finished", || async {
            let content = match outcome {
                TaskOutcome::Completed => {
                    format!("**Completed** `{}` after {} attempt(s)\n\n---\n\n", task, attempts)
                }
                TaskOutcome::Failed => {
                    format!("**Failed** `{}` after {} attempt(s)\n\n---\n\n", task, attempts)
                }
            };
            self.append_internal(&content).await
        })
        .await;
    }

    /// Log a fatal error that stopped the run
    pub async fn log_halted(&self, stage: &str, message: &str) {
        fail_open("activity_logger::log_halted", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let content = format!(
                "## Halted\n**Time**: {}\n**Stage**: {}\n**Error**: {}\n\n",
                timestamp, stage, message
            );
            self.append_internal(&content).await
        })
        .await;
    }

    /// Append content to the activity log (internal, returns Result for fail_open)
    async fn append_internal(&self, content: &str) -> kiln_core::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

fn preview(code: &str) -> String {
    if code.chars().count() > ACTIVITY_LOG_PREVIEW_CHARS {
        let truncated: String = code.chars().take(ACTIVITY_LOG_PREVIEW_CHARS).collect();
        format!("{truncated}\n// ...")
    } else {
        code.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::attempt_report;
    use kiln_core::{Critique, Observation};
    use tempfile::TempDir;
    use tokio::fs;

    #[tokio::test]
    async fn test_log_run_start_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let kiln_dir = temp_dir.path().join(".kiln");
        let logger = ActivityLogger::new(kiln_dir.clone());

        logger.log_run_start(5, false).await;

        let content = fs::read_to_string(kiln_dir.join("activity.md")).await.unwrap();
        assert!(content.contains("# Kiln Activity Log"));
        assert!(content.contains("**Max Tries**: 5"));
        assert!(content.contains("**Resumed**: no"));
    }

    #[tokio::test]
    async fn test_log_task_and_attempts() {
        let temp_dir = TempDir::new().unwrap();
        let kiln_dir = temp_dir.path().to_path_buf();
        let logger = ActivityLogger::new(kiln_dir.clone());

        logger.log_run_start(3, true).await;
        logger.log_task_start("Mine 1 wood log", "Trees are nearby").await;

        let mut observation = Observation::default();
        observation.record_error("No code block found in the reply");
        let report = attempt_report(
            "Mine 1 wood log",
            1,
            3,
            None,
            &observation,
            &Critique::failure("No code block found in the reply"),
        );
        logger.log_attempt(&report).await;

        let report = attempt_report(
            "Mine 1 wood log",
            2,
            3,
            Some(("mineLog", "await mineLog(bot);".to_string())),
            &Observation::default(),
            &Critique::success(""),
        );
        logger.log_attempt(&report).await;
        logger
            .log_task_finished("Mine 1 wood log", TaskOutcome::Completed, 2)
            .await;

        let content = fs::read_to_string(kiln_dir.join("activity.md")).await.unwrap();
        assert!(content.contains("## Task: Mine 1 wood log"));
        assert!(content.contains("### Attempt 1/3"));
        assert!(content.contains("✗ failure"));
        assert!(content.contains("- No code block found in the reply"));
        assert!(content.contains("**Entry**: `mineLog`"));
        assert!(content.contains("✓ success"));
        assert!(content.contains("**Completed** `Mine 1 wood log` after 2 attempt(s)"));
    }

    #[tokio::test]
    async fn test_log_halted() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp_dir.path().to_path_buf());

        logger.log_halted("critic", "Critique parse failed: no JSON").await;

        let content = fs::read_to_string(temp_dir.path().join("activity.md"))
            .await
            .unwrap();
        assert!(content.contains("**Stage**: critic"));
    }

    #[tokio::test]
    async fn test_truncate_long_code() {
        let long_code = "x".repeat(1000);
        let shown = preview(&long_code);
        assert!(shown.ends_with("// ..."));
        assert!(!shown.contains(&"x".repeat(600)));
    }

    #[tokio::test]
    async fn test_unwritable_path_fails_open() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, "not a directory").await.unwrap();

        // Parent is a regular file, so every write fails
        let logger = ActivityLogger::new(blocker.join("nested"));
        logger.log_run_start(1, false).await;
        logger.log_task_start("t", "r").await;
    }
}
