//! Core type definitions for Kiln

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A unit of work proposed to the agent
///
/// The command is the task's identity: two tasks with the same command are
/// the same task as far as history is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// One-line command (e.g. "Mine 1 wood log")
    pub command: String,
    /// Why the curriculum chose this task
    pub reasoning: String,
    /// Supporting knowledge gathered for the task
    #[serde(default)]
    pub context: String,
}

impl Task {
    pub fn new(command: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            reasoning: reasoning.into(),
            context: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Identifier used for history bookkeeping
    pub fn id(&self) -> &str {
        &self.command
    }

    /// Text used to look up related skills
    pub fn query_text(&self) -> String {
        if self.context.trim().is_empty() {
            self.command.clone()
        } else {
            format!("{}\n{}", self.command, self.context)
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command)
    }
}

/// Bot position in world coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Snapshot of the world after an environment call
///
/// The core treats this as opaque apart from the error list and the chest
/// view, which the control loop merges with its world memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    pub biome: String,
    pub time_of_day: String,
    pub nearby_blocks: Vec<String>,
    pub other_blocks: Vec<String>,
    pub nearby_entities: BTreeMap<String, f64>,
    pub health: f64,
    pub hunger: f64,
    pub position: Position,
    pub equipment: Vec<Option<String>>,
    pub inventory: BTreeMap<String, u32>,
    /// Chest contents keyed by position string
    pub chests: BTreeMap<String, String>,
    /// Execution errors reported by the environment
    pub errors: Vec<String>,
    /// Chat lines emitted by the bot
    pub chat: Vec<String>,
}

impl Observation {
    /// Record an error that did not come from the environment itself
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

impl std::fmt::Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entities: Vec<String> = self
            .nearby_entities
            .iter()
            .map(|(name, dist)| format!("{}: {:.1}", name, dist))
            .collect();
        let equipment: Vec<String> = self
            .equipment
            .iter()
            .map(|slot| slot.clone().unwrap_or_else(|| "None".to_string()))
            .collect();
        let inventory: Vec<String> = self
            .inventory
            .iter()
            .map(|(item, count)| format!("{}: {}", item, count))
            .collect();
        let chests: Vec<String> = self
            .chests
            .iter()
            .map(|(pos, contents)| format!("[{}: {}]", pos, contents))
            .collect();

        writeln!(f, "Biome: {}", self.biome)?;
        writeln!(f, "Time: {}", self.time_of_day)?;
        writeln!(f, "Nearby blocks: {}", join_or_none(&self.nearby_blocks))?;
        writeln!(f, "Other blocks: {}", join_or_none(&self.other_blocks))?;
        writeln!(f, "Nearby entities: {}", join_or_none(&entities))?;
        writeln!(f, "Health: {:.1}/20", self.health)?;
        writeln!(f, "Hunger: {:.1}/20", self.hunger)?;
        writeln!(
            f,
            "Position: x={:.1}, y={:.1}, z={:.1}",
            self.position.x, self.position.y, self.position.z
        )?;
        writeln!(f, "Equipment: {}", join_or_none(&equipment))?;
        writeln!(
            f,
            "Inventory ({}/36): {}",
            self.inventory.len(),
            if inventory.is_empty() {
                "Empty".to_string()
            } else {
                inventory.join(", ")
            }
        )?;
        writeln!(f, "Chests: {}", join_or_none(&chests))?;
        writeln!(f, "Execution error: {}", join_or_none(&self.errors))?;
        write!(f, "Chat log: {}", join_or_none(&self.chat))
    }
}

/// A validated, invocable unit of generated code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUnit {
    /// Name of the selected entry function
    pub entry: String,
    /// Every function definition found in the reply, normalised
    pub body: String,
    /// Call expression for the entry function (`await entry(bot);`)
    pub invocation: String,
}

impl CodeUnit {
    /// Source the environment should run: definitions followed by the call
    pub fn program(&self) -> String {
        format!("{}\n{}", self.body, self.invocation)
    }
}

/// A code unit promoted to the skill library after a successful attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub code: String,
    pub description: String,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            description: description.into(),
        }
    }

    /// Build a skill from a successful code unit
    pub fn from_unit(unit: &CodeUnit, description: impl Into<String>) -> Self {
        Self::new(unit.entry.clone(), unit.body.clone(), description)
    }
}

/// Judgement of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub success: bool,
    pub description: String,
}

impl Critique {
    pub fn success(description: impl Into<String>) -> Self {
        Self {
            success: true,
            description: description.into(),
        }
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
        }
    }
}

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of a conversation sent to the generation port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// How much of the world to reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    #[default]
    Hard,
    Soft,
}

impl std::str::FromStr for ResetMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hard" => Ok(Self::Hard),
            "soft" => Ok(Self::Soft),
            _ => Err(format!("Invalid reset mode: {}. Use hard or soft.", s)),
        }
    }
}

/// Options passed to `Environment::reset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetOptions {
    pub mode: ResetMode,
    /// Port of the game server to join
    pub mc_port: Option<u16>,
    /// Ticks to wait after each step
    pub wait_ticks: u32,
    /// Starting inventory for a hard reset
    #[serde(default)]
    pub inventory: BTreeMap<String, u32>,
    /// Spawn position for a hard reset
    #[serde(default)]
    pub position: Option<Position>,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            mode: ResetMode::Hard,
            mc_port: None,
            wait_ticks: 5,
            inventory: BTreeMap::new(),
            position: None,
        }
    }
}
