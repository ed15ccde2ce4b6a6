//! Builds one [`Observation`] from one bridge response
//!
//! The bridge answers every call with a list of `[event_type, payload]`
//! pairs. Errors and chat accumulate over the whole list; world state comes
//! from the last `observe` event.

use kiln_core::{Observation, Position};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One `[event_type, payload]` pair from the bridge
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeEvent(pub String, pub Value);

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ObservePayload {
    voxels: Vec<String>,
    block_records: Vec<String>,
    status: Status,
    inventory: BTreeMap<String, u32>,
    nearby_chests: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Status {
    health: f64,
    food: f64,
    position: Position,
    equipment: Vec<Option<String>>,
    biome: String,
    entities: BTreeMap<String, f64>,
    time_of_day: String,
}

/// Render a chest entry: a plain marker (`"Unknown"`, `"Invalid"`) or an
/// item map
fn chest_contents(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(items) if items.is_empty() => "Empty".to_string(),
        Value::Object(items) => items
            .iter()
            .map(|(item, count)| format!("{}: {}", item, count))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Converts bridge events into observations
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservationBuilder;

impl ObservationBuilder {
    pub fn build(&self, events: &[BridgeEvent]) -> Observation {
        let mut observation = Observation {
            biome: "unknown".to_string(),
            time_of_day: "unknown".to_string(),
            ..Observation::default()
        };

        for BridgeEvent(kind, payload) in events {
            match kind.as_str() {
                "onError" => {
                    if let Some(msg) = payload.get("onError").and_then(Value::as_str) {
                        if !msg.is_empty() {
                            observation.errors.push(msg.to_string());
                        }
                    }
                }
                "onChat" => {
                    if let Some(msg) = payload.get("onChat").and_then(Value::as_str) {
                        if !msg.is_empty() {
                            observation.chat.push(msg.to_string());
                        }
                    }
                }
                "observe" => match serde_json::from_value::<ObservePayload>(payload.clone()) {
                    Ok(state) => apply_state(&mut observation, state),
                    Err(e) => tracing::warn!("Ignoring malformed observe event: {}", e),
                },
                other => tracing::debug!("Ignoring bridge event {}", other),
            }
        }

        observation
    }
}

fn apply_state(observation: &mut Observation, state: ObservePayload) {
    let status = state.status;
    if !status.biome.is_empty() {
        observation.biome = status.biome;
    }
    if !status.time_of_day.is_empty() {
        observation.time_of_day = status.time_of_day;
    }
    observation.health = status.health;
    observation.hunger = status.food;
    observation.position = status.position;
    observation.equipment = status.equipment;
    observation.nearby_entities = status.entities;
    observation.nearby_blocks = state.voxels;
    observation.other_blocks = state.block_records;
    observation.inventory = state.inventory;
    observation.chests = state
        .nearby_chests
        .iter()
        .map(|(pos, value)| (pos.clone(), chest_contents(value)))
        .collect();
}
