//! Illumination command table.
//!
//! Each command sets the amplitude of one or more AOTF channels; channels it
//! does not mention are left alone.
//!
//! ```toml
//! [[illumination_command]]
//! name = "647 on"
//! amplitudes = { "647" = 4000, "561" = 0 }
//! ```

use super::CommandResolver;
use crate::error::{AppResult, FluidicsError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Named per-channel amplitude settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IlluminationCommand {
    name: String,
    amplitudes: BTreeMap<String, u16>,
}

impl IlluminationCommand {
    /// Build a command from `(channel id, amplitude)` pairs.
    pub fn new<I, S>(name: impl Into<String>, amplitudes: I) -> Self
    where
        I: IntoIterator<Item = (S, u16)>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            amplitudes: amplitudes
                .into_iter()
                .map(|(channel, amplitude)| (channel.into(), amplitude))
                .collect(),
        }
    }

    /// Command that touches no channel.
    pub fn no_change() -> Self {
        Self {
            name: "No Change".to_string(),
            amplitudes: BTreeMap::new(),
        }
    }

    /// Command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Amplitude per channel id, ordered by channel id.
    pub fn amplitudes(&self) -> &BTreeMap<String, u16> {
        &self.amplitudes
    }

    /// True when no channel is addressed.
    pub fn is_no_change(&self) -> bool {
        self.amplitudes.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct IlluminationDocument {
    #[serde(default, rename = "illumination_command")]
    commands: Vec<IlluminationCommand>,
}

/// Named illumination commands.
#[derive(Debug, Clone, Default)]
pub struct IlluminationCommandTable {
    commands: Vec<IlluminationCommand>,
}

impl IlluminationCommandTable {
    /// Build a table, rejecting duplicate names.
    pub fn new(commands: Vec<IlluminationCommand>) -> AppResult<Self> {
        let mut seen = HashSet::new();
        for command in &commands {
            if !seen.insert(command.name.as_str()) {
                return Err(FluidicsError::parse(
                    "illumination commands",
                    format!("duplicate command name '{}'", command.name),
                ));
            }
        }
        Ok(Self { commands })
    }

    /// Read and parse an illumination command document.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let source_name = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FluidicsError::parse(&source_name, e))?;
        Self::from_toml_str(&content, &source_name)
    }

    /// Parse an illumination command document held in memory.
    pub fn from_toml_str(content: &str, source_name: &str) -> AppResult<Self> {
        let document: IlluminationDocument =
            toml::from_str(content).map_err(|e| FluidicsError::parse(source_name, e))?;
        Self::new(document.commands)
    }

    /// Check every command only addresses known channel ids.
    pub fn check_channels<'a>(&self, known: impl IntoIterator<Item = &'a str>) -> AppResult<()> {
        let known: HashSet<&str> = known.into_iter().collect();
        for command in &self.commands {
            if let Some(channel) = command
                .amplitudes
                .keys()
                .find(|channel| !known.contains(channel.as_str()))
            {
                return Err(FluidicsError::parse(
                    "illumination commands",
                    format!(
                        "command '{}' addresses unknown channel '{}'",
                        command.name, channel
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when no commands are defined.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl CommandResolver for IlluminationCommandTable {
    type Command = IlluminationCommand;

    fn resolve(&self, step_name: &str) -> AppResult<IlluminationCommand> {
        self.commands
            .iter()
            .find(|c| c.name == step_name)
            .cloned()
            .ok_or_else(|| FluidicsError::UnknownStep(step_name.to_string()))
    }

    fn no_change(&self) -> IlluminationCommand {
        IlluminationCommand::no_change()
    }

    fn command_names(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
        [[illumination_command]]
        name = "647 on"
        amplitudes = { "647" = 4000, "561" = 0 }

        [[illumination_command]]
        name = "dark"
        amplitudes = { "647" = 0 }
    "#;

    #[test]
    fn test_parse_and_resolve() {
        let table = IlluminationCommandTable::from_toml_str(DOC, "test").unwrap();
        assert_eq!(table.len(), 2);

        let command = table.resolve("647 on").unwrap();
        let pairs: Vec<(&str, u16)> = command
            .amplitudes()
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        assert_eq!(pairs, vec![("561", 0), ("647", 4000)]);
    }

    #[test]
    fn test_unknown_step_and_no_change() {
        let table = IlluminationCommandTable::from_toml_str(DOC, "test").unwrap();
        assert!(table.resolve("488 on").is_err());
        assert!(table.no_change().is_no_change());
    }

    #[test]
    fn test_check_channels() {
        let table = IlluminationCommandTable::from_toml_str(DOC, "test").unwrap();
        assert!(table.check_channels(["647", "561"]).is_ok());

        let err = table.check_channels(["647"]).unwrap_err();
        assert!(err.to_string().contains("unknown channel '561'"));
    }
}
