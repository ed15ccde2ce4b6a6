//! # kiln-skills
//!
//! The skill library: successful code units stored with a natural-language
//! description and retrieved by similarity to later tasks.

mod describer;
mod repository;
pub mod term_index;

pub use describer::SkillDescriber;
pub use repository::{ExistingIndex, IndexLoader, SkillRepository, TermIndexLoader};
pub use term_index::TermIndex;
