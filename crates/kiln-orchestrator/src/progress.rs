//! Progress channel for observers of the control loop
//!
//! Delivery is best-effort: sending never blocks, a channel without
//! receivers drops events, and a lagging receiver skips what it missed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use kiln_core::{Critique, Observation};

/// Default number of events buffered per receiver
pub const DEFAULT_PROGRESS_CAPACITY: usize = 256;

/// Snapshot of one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub task: String,
    /// 1-based attempt number
    pub attempt: usize,
    pub max_tries: usize,
    /// Entry function of the generated unit, if one was produced
    pub entry: Option<String>,
    /// Generated program
    pub code: Option<String>,
    pub observation: Observation,
    pub success: bool,
    pub critique: String,
    pub timestamp: DateTime<Utc>,
}

/// Terminal outcome of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    Failed,
}

/// Event published by the control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskProposed {
        task: String,
        reasoning: String,
    },
    Attempt(AttemptReport),
    TaskFinished {
        task: String,
        outcome: TaskOutcome,
        attempts: usize,
    },
    /// A fatal error stopped the loop
    Halted {
        stage: String,
        message: String,
    },
}

/// Broadcast sink for progress events
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event without waiting for observers
    pub fn emit(&self, event: ProgressEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream, skipping over lag notifications
    pub fn stream(&self) -> impl Stream<Item = ProgressEvent> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!("Progress observer lagged: {}", e);
                None
            }
        })
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_CAPACITY)
    }
}

/// Attempt report from the observation and critique of one attempt
pub fn attempt_report(
    task: &str,
    attempt: usize,
    max_tries: usize,
    code: Option<(&str, String)>,
    observation: &Observation,
    critique: &Critique,
) -> AttemptReport {
    let (entry, code) = match code {
        Some((entry, program)) => (Some(entry.to_string()), Some(program)),
        None => (None, None),
    };
    AttemptReport {
        task: task.to_string(),
        attempt,
        max_tries,
        entry,
        code,
        observation: observation.clone(),
        success: critique.success,
        critique: critique.description.clone(),
        timestamp: Utc::now(),
    }
}
