//! Configuration System using Figment
//!
//! Strongly-typed configuration for the fluidics suite. Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables (prefixed with `RUST_FLUIDICS_`)
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! RUST_FLUIDICS_APPLICATION__LOG_LEVEL=debug
//! RUST_FLUIDICS_PATHS__PROTOCOLS=/data/protocols.toml
//! RUST_FLUIDICS_SEQUENCER__POLL_INTERVAL="500ms"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_fluidics::config::FluidicsConfig;
//!
//! let config = FluidicsConfig::load_from("config/fluidics.toml")?;
//! println!("Protocols: {}", config.paths.protocols.display());
//! # Ok::<(), rust_fluidics::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "RUST_FLUIDICS_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FluidicsConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sequencer event-loop settings
    #[serde(default)]
    pub sequencer: SequencerConfig,
    /// Where protocols and commands are loaded from
    #[serde(default)]
    pub paths: CatalogSource,
    /// AOTF channel table
    #[serde(default)]
    pub illumination: IlluminationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Fluidics".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Sequencer event-loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Cadence of the elapsed-time poller
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Capacity of the notification broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Capacity of the command mailbox
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            event_capacity: default_event_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}

/// Explicit source for protocol and command documents.
///
/// Both paths may point at the same full-configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSource {
    /// Protocol document
    #[serde(default = "default_config_file")]
    pub protocols: PathBuf,
    /// Valve command document
    #[serde(default = "default_config_file")]
    pub commands: PathBuf,
}

impl CatalogSource {
    /// Source where protocols and commands share one file.
    pub fn full(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            protocols: path.clone(),
            commands: path,
        }
    }

    /// Whether protocols and commands come from the same document.
    pub fn is_full_configuration(&self) -> bool {
        self.protocols == self.commands
    }
}

impl Default for CatalogSource {
    fn default() -> Self {
        Self::full(default_config_file())
    }
}

/// AOTF illumination configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IlluminationConfig {
    /// Frequency-shift keying mode
    #[serde(default)]
    pub use_fsk: bool,
    /// Per-channel frequency table
    #[serde(default)]
    pub channels: Vec<AotfChannelConfig>,
}

/// One AOTF channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AotfChannelConfig {
    /// Logical channel id used by illumination commands (e.g. "488")
    pub id: String,
    /// Hardware channel number on the AOTF driver
    pub channel: u8,
    /// RF frequency (MHz) that diffracts the line
    pub on_frequency: f64,
    /// RF frequency (MHz) parked away from the line
    pub off_frequency: f64,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_event_capacity() -> usize {
    64
}

fn default_command_capacity() -> usize {
    32
}

fn default_config_file() -> PathBuf {
    PathBuf::from("config/default_config.toml")
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl FluidicsConfig {
    /// Load configuration from a specific file path, then environment overrides.
    ///
    /// Missing keys fall back to defaults; the result is validated before it
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(FluidicsConfig::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Defaults plus environment overrides, without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(FluidicsConfig::default()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Parse configuration from an in-memory TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(FluidicsConfig::default()))
                .merge(Toml::string(content)),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Poll interval and channel capacities are non-zero
    /// - AOTF channel ids are unique and frequencies positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.sequencer.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "sequencer.poll_interval must be > 0".to_string(),
            ));
        }
        if self.sequencer.event_capacity == 0 || self.sequencer.command_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "sequencer channel capacities must be > 0".to_string(),
            ));
        }

        let mut ids = std::collections::HashSet::new();
        for channel in &self.illumination.channels {
            if !ids.insert(&channel.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate AOTF channel id: '{}'",
                    channel.id
                )));
            }
            if channel.on_frequency <= 0.0 || channel.off_frequency <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "AOTF channel '{}': frequencies must be > 0",
                    channel.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FluidicsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sequencer.poll_interval, Duration::from_secs(1));
        assert!(config.paths.is_full_configuration());
    }

    #[test]
    fn test_parse_from_toml() {
        let config = FluidicsConfig::from_toml_str(
            r#"
            [application]
            name = "Bench"
            log_level = "debug"

            [sequencer]
            poll_interval = "250ms"

            [paths]
            protocols = "protocols.toml"
            commands = "commands.toml"

            [[illumination.channels]]
            id = "647"
            channel = 0
            on_frequency = 80.0
            off_frequency = 20.0
            "#,
        )
        .unwrap();

        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.sequencer.poll_interval, Duration::from_millis(250));
        assert_eq!(config.sequencer.event_capacity, 64);
        assert!(!config.paths.is_full_configuration());
        assert_eq!(config.illumination.channels.len(), 1);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = FluidicsConfig::default();
        config.application.log_level = "chatty".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = FluidicsConfig::default();
        config.sequencer.event_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_channel_ids() {
        let channel = AotfChannelConfig {
            id: "561".to_string(),
            channel: 1,
            on_frequency: 90.0,
            off_frequency: 25.0,
        };
        let mut config = FluidicsConfig::default();
        config.illumination.channels = vec![channel.clone(), channel];

        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate AOTF channel id"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fluidics.toml");
        std::fs::write(&path, "[application]\nname = \"Scope\"\nlog_level = \"warn\"\n").unwrap();

        let config = FluidicsConfig::load_from(&path).unwrap();
        assert_eq!(config.application.name, "Scope");
        assert_eq!(config.application.log_level, "warn");
    }
}
