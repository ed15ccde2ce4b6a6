//! # kiln-orchestrator
//!
//! The agent control loop and everything around it.
//!
//! This crate provides:
//! - A pure attempt state machine bounding retries per task
//! - The control loop sequencing curriculum, synthesis, environment and critic
//! - World memory carried across environment steps
//! - A best-effort progress channel and a Markdown activity log
//! - A supervisor that starts, stops and restarts the loop

mod activity_logger;
mod agent_loop;
mod memory;
mod progress;
mod state_machine;
mod supervisor;

pub use activity_logger::ActivityLogger;
pub use agent_loop::{load_history, AgentLoop, LoopComponents, LoopConfig, LoopExit};
pub use memory::WorldMemory;
pub use progress::{
    attempt_report, AttemptReport, ProgressChannel, ProgressEvent, TaskOutcome,
    DEFAULT_PROGRESS_CAPACITY,
};
pub use state_machine::{transition, AttemptAction, AttemptEvent, AttemptState};
pub use supervisor::AgentSupervisor;
