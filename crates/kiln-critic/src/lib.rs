//! # kiln-critic
//!
//! Judges each attempt from the world state it left behind. The verdict's
//! success flag alone decides whether the task is complete.

mod critic;
pub mod verdict;

pub use critic::{build_conversation, Critic};
pub use verdict::{parse_verdict, Verdict};
