//! Valve command table.
//!
//! A valve command is one port position per valve in the chain:
//!
//! ```toml
//! [[command]]
//! name = "Buffer A"
//! valves = [1, 0, 3]   # 0 leaves that valve where it is
//! ```
//!
//! Every command in a document must address the same number of valves.

use super::CommandResolver;
use crate::error::{AppResult, FluidicsError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Target of a single valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValvePosition {
    /// Leave the valve where it is
    Hold,
    /// Move to a port (1-based)
    Port(u8),
}

impl From<u8> for ValvePosition {
    fn from(value: u8) -> Self {
        match value {
            0 => ValvePosition::Hold,
            port => ValvePosition::Port(port),
        }
    }
}

impl fmt::Display for ValvePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValvePosition::Hold => f.write_str("-"),
            ValvePosition::Port(port) => write!(f, "{port}"),
        }
    }
}

/// A named set of valve positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValveCommand {
    name: String,
    positions: Vec<ValvePosition>,
}

impl ValveCommand {
    /// Build a command from raw port numbers (0 = hold).
    pub fn new(name: impl Into<String>, ports: impl IntoIterator<Item = u8>) -> Self {
        Self {
            name: name.into(),
            positions: ports.into_iter().map(ValvePosition::from).collect(),
        }
    }

    /// Command that holds `num_valves` valves in place.
    pub fn no_change(num_valves: usize) -> Self {
        Self {
            name: "No Change".to_string(),
            positions: vec![ValvePosition::Hold; num_valves],
        }
    }

    /// Command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One position per valve.
    pub fn positions(&self) -> &[ValvePosition] {
        &self.positions
    }

    /// True when every valve holds.
    pub fn is_no_change(&self) -> bool {
        self.positions.iter().all(|p| *p == ValvePosition::Hold)
    }
}

impl fmt::Display for ValveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let positions: Vec<String> = self.positions.iter().map(ToString::to_string).collect();
        write!(f, "{} [{}]", self.name, positions.join(", "))
    }
}

#[derive(Debug, Deserialize)]
struct CommandDocument {
    #[serde(default, rename = "command")]
    commands: Vec<RawCommand>,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    name: String,
    valves: Vec<u8>,
}

/// Named valve commands for one valve chain.
#[derive(Debug, Clone, Default)]
pub struct ValveCommandTable {
    commands: Vec<ValveCommand>,
    num_valves: usize,
}

impl ValveCommandTable {
    /// Build a table from commands.
    ///
    /// # Errors
    ///
    /// `FluidicsError::Parse` on duplicate names or inconsistent valve counts.
    pub fn new(commands: Vec<ValveCommand>) -> AppResult<Self> {
        let num_valves = commands.first().map_or(0, |c| c.positions.len());
        let mut seen = HashSet::new();
        for command in &commands {
            if !seen.insert(command.name.as_str()) {
                return Err(FluidicsError::parse(
                    "valve commands",
                    format!("duplicate command name '{}'", command.name),
                ));
            }
            if command.positions.len() != num_valves {
                return Err(FluidicsError::parse(
                    "valve commands",
                    format!(
                        "command '{}' addresses {} valves, expected {}",
                        command.name,
                        command.positions.len(),
                        num_valves
                    ),
                ));
            }
        }
        Ok(Self {
            commands,
            num_valves,
        })
    }

    /// Read and parse a command document.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let source_name = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FluidicsError::parse(&source_name, e))?;
        let table = Self::from_toml_str(&content, &source_name)?;
        tracing::info!(
            source = %source_name,
            commands = table.len(),
            valves = table.num_valves(),
            "Loaded valve commands"
        );
        Ok(table)
    }

    /// Parse a command document held in memory.
    pub fn from_toml_str(content: &str, source_name: &str) -> AppResult<Self> {
        let document: CommandDocument =
            toml::from_str(content).map_err(|e| FluidicsError::parse(source_name, e))?;
        let commands = document
            .commands
            .into_iter()
            .map(|raw| ValveCommand::new(raw.name, raw.valves))
            .collect();
        Self::new(commands).map_err(|e| match e {
            FluidicsError::Parse { message, .. } => FluidicsError::parse(source_name, message),
            other => other,
        })
    }

    /// Number of valves each command addresses.
    pub fn num_valves(&self) -> usize {
        self.num_valves
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when no commands are defined.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Command by name.
    pub fn get(&self, name: &str) -> Option<&ValveCommand> {
        self.commands.iter().find(|c| c.name == name)
    }
}

impl CommandResolver for ValveCommandTable {
    type Command = ValveCommand;

    fn resolve(&self, step_name: &str) -> AppResult<ValveCommand> {
        self.get(step_name)
            .cloned()
            .ok_or_else(|| FluidicsError::UnknownStep(step_name.to_string()))
    }

    fn no_change(&self) -> ValveCommand {
        ValveCommand::no_change(self.num_valves)
    }

    fn command_names(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
        [[command]]
        name = "Buffer A"
        valves = [1, 0, 3]

        [[command]]
        name = "Buffer B"
        valves = [2, 2, 0]
    "#;

    #[test]
    fn test_parse_and_resolve() {
        let table = ValveCommandTable::from_toml_str(DOC, "test").unwrap();
        assert_eq!(table.num_valves(), 3);
        assert_eq!(table.command_names(), vec!["Buffer A", "Buffer B"]);

        let command = table.resolve("Buffer A").unwrap();
        assert_eq!(
            command.positions(),
            &[
                ValvePosition::Port(1),
                ValvePosition::Hold,
                ValvePosition::Port(3)
            ]
        );
        assert_eq!(command.to_string(), "Buffer A [1, -, 3]");
    }

    #[test]
    fn test_unknown_name() {
        let table = ValveCommandTable::from_toml_str(DOC, "test").unwrap();
        assert!(matches!(
            table.resolve("Buffer C"),
            Err(FluidicsError::UnknownStep(name)) if name == "Buffer C"
        ));
    }

    #[test]
    fn test_no_change_matches_valve_count() {
        let table = ValveCommandTable::from_toml_str(DOC, "test").unwrap();
        let hold = table.no_change();
        assert_eq!(hold.positions().len(), 3);
        assert!(hold.is_no_change());
    }

    #[test]
    fn test_inconsistent_valve_count_rejected() {
        let doc = r#"
            [[command]]
            name = "A"
            valves = [1, 2]
            [[command]]
            name = "B"
            valves = [1]
        "#;
        let err = ValveCommandTable::from_toml_str(doc, "cmds.toml").unwrap_err();
        assert!(err.to_string().contains("cmds.toml"));
        assert!(err.to_string().contains("expected 2"));
    }

    #[test]
    fn test_duplicate_command_rejected() {
        let result = ValveCommandTable::new(vec![
            ValveCommand::new("A", [1]),
            ValveCommand::new("A", [2]),
        ]);
        assert!(result.is_err());
    }
}
