//! Custom error types for the application.
//!
//! This module defines the primary error type, `FluidicsError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures a protocol run can hit, from malformed protocol
//! files to a start request naming a protocol that was never loaded.
//!
//! ## Error Hierarchy
//!
//! - **`Parse`**: A protocol or command document could not be read or is malformed.
//!   Loading is all-or-nothing, so the previously loaded catalog is still in effect.
//! - **`IndexOutOfRange`** / **`ProtocolNotFound`**: A start request named a protocol
//!   that is not in the catalog. The request is a no-op.
//! - **`UnknownStep`**: A resolver has no mapping for a step name. The sequencer never
//!   surfaces this to callers; it substitutes a no-change command and keeps to schedule.
//! - **`ReloadWhileRunning`** / **`ManualCommandWhileRunning`**: Caller sequencing errors
//!   that are rejected explicitly instead of disturbing the active run.
//! - **`Device`**: A hardware collaborator (valve chain, AOTF) failed a write.
//! - **`SequencerUnavailable`**: The sequencer task has shut down.
//! - **`Config`**: Wraps errors from the layered configuration system.

use crate::config::ConfigError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, FluidicsError>;

/// Every failure the crate reports.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum FluidicsError {
    #[error("Failed to parse '{source_name}': {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol index {index} out of range (catalog holds {len} protocols)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Protocol '{0}' not found")]
    ProtocolNotFound(String),

    #[error("Unknown step '{0}'")]
    UnknownStep(String),

    #[error("Cannot reload protocols while '{0}' is running")]
    ReloadWhileRunning(String),

    #[error("Cannot issue manual command while '{0}' is running")]
    ManualCommandWhileRunning(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Sequencer is no longer running")]
    SequencerUnavailable,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl FluidicsError {
    /// Build a parse error for the named source.
    pub fn parse(source_name: impl Into<String>, message: impl ToString) -> Self {
        FluidicsError::Parse {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}
