//! # kiln-core
//!
//! Core types for the Kiln skill-acquisition agent.
//!
//! Kiln runs a closed loop: a curriculum proposes a task, a language model
//! writes code for it, the code runs in a live environment, a critic judges
//! the outcome, and successful code is fired into a reusable skill.
//!
//! ## Core Paradigm
//!
//! - Tasks are proposed one at a time and retired into completed/failed history
//! - Code units are validated before they ever reach the environment
//! - Skills are code units that survived, retrievable by similarity
//! - Every external capability (model, environment, index) is a port

pub mod config;
mod error;
pub mod fail_open;
pub mod ports;
mod types;

pub use config::KilnConfig;
pub use error::{KilnError, Result};
pub use types::*;
