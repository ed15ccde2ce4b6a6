//! # kiln-env
//!
//! Environment port implementation for a Mineflayer HTTP bridge, plus the
//! builder that turns bridge events into observations.

mod mineflayer;
pub mod observation;

pub use mineflayer::{MineflayerEnvironment, MineflayerFactory};
pub use observation::{BridgeEvent, ObservationBuilder};
