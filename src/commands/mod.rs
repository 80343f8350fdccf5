//! Command resolution: step name → executable hardware command.
//!
//! The sequencer only ever talks to hardware configuration through
//! [`CommandResolver`]. Two tables are provided:
//!
//! - [`valve::ValveCommandTable`] - named valve-position vectors for a valve chain
//! - [`illumination::IlluminationCommandTable`] - named per-channel AOTF amplitudes

pub mod illumination;
pub mod valve;

use crate::error::AppResult;
use std::fmt::Debug;

pub use illumination::{IlluminationCommand, IlluminationCommandTable};
pub use valve::{ValveCommand, ValveCommandTable, ValvePosition};

/// Maps step names to executable commands.
pub trait CommandResolver: Send + 'static {
    /// Command type produced by this resolver.
    type Command: Clone + Debug + Send + Sync + 'static;

    /// Resolve a step name.
    ///
    /// # Errors
    ///
    /// `FluidicsError::UnknownStep` when the name has no mapping.
    fn resolve(&self, step_name: &str) -> AppResult<Self::Command>;

    /// Command that leaves all hardware as it is. Substituted for unresolved steps.
    fn no_change(&self) -> Self::Command;

    /// Called after a resolved command has been issued.
    fn command_issued(&mut self, _step_name: &str, _command: &Self::Command) {}

    /// Names this resolver knows, in definition order.
    fn command_names(&self) -> Vec<String>;
}
