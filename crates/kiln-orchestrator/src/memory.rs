//! Persistent world memory carried across environment steps

use std::collections::BTreeMap;

use kiln_core::Observation;

/// Marker the environment uses for a chest that no longer exists
const INVALID_CHEST: &str = "Invalid";

/// Side memory of the world that outlives a single observation
///
/// Only chest contents are remembered. The bot only reports chests it has
/// just opened, so without this memory the model would forget every chest
/// it walked away from.
#[derive(Debug, Clone, Default)]
pub struct WorldMemory {
    chests: BTreeMap<String, String>,
}

impl WorldMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a fresh observation into memory and return the merged view
    ///
    /// The input is left untouched; the returned observation carries every
    /// remembered chest.
    pub fn merge(&mut self, observation: &Observation) -> Observation {
        for (position, contents) in &observation.chests {
            if contents == INVALID_CHEST {
                self.chests.remove(position);
            } else {
                self.chests.insert(position.clone(), contents.clone());
            }
        }

        let mut merged = observation.clone();
        merged.chests = self.chests.clone();
        merged
    }

    pub fn chests(&self) -> &BTreeMap<String, String> {
        &self.chests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_chests(chests: &[(&str, &str)]) -> Observation {
        let mut obs = Observation::default();
        for (pos, contents) in chests {
            obs.chests.insert(pos.to_string(), contents.to_string());
        }
        obs
    }

    #[test]
    fn test_chests_persist_across_steps() {
        let mut memory = WorldMemory::new();
        memory.merge(&with_chests(&[("(1, 64, 2)", "oak_log: 4")]));

        let merged = memory.merge(&with_chests(&[("(9, 63, 0)", "Unknown items inside")]));
        assert_eq!(merged.chests.len(), 2);
        assert_eq!(merged.chests["(1, 64, 2)"], "oak_log: 4");
    }

    #[test]
    fn test_invalid_removes_chest() {
        let mut memory = WorldMemory::new();
        memory.merge(&with_chests(&[("(1, 64, 2)", "oak_log: 4")]));

        let merged = memory.merge(&with_chests(&[("(1, 64, 2)", "Invalid")]));
        assert!(merged.chests.is_empty());
        assert!(memory.chests().is_empty());
    }

    #[test]
    fn test_merge_does_not_alias_input() {
        let mut memory = WorldMemory::new();
        memory.merge(&with_chests(&[("a", "stone: 1")]));

        let fresh = with_chests(&[("b", "dirt: 2")]);
        let merged = memory.merge(&fresh);
        assert_eq!(fresh.chests.len(), 1);
        assert_eq!(merged.chests.len(), 2);
    }
}
