//! # kiln-curriculum
//!
//! Proposes the next task from the current world state and the history of
//! completed and failed tasks, enriched with self-asked questions.

mod curriculum;
mod history;
pub mod parser;
mod qa;

pub use curriculum::{build_conversation, Curriculum};
pub use history::TaskHistory;
pub use parser::{parse_questions, parse_task};
pub use qa::{render_entries, QaEntry, QaService};
