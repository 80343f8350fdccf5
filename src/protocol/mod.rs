//! Protocol catalog, sequencer state machine and its tokio driver.

pub mod actor;
pub mod catalog;
pub mod messages;
pub mod observer;
pub mod sequencer;
pub mod timer;

pub use actor::{spawn, SequencerActor, SequencerHandle};
pub use catalog::{Catalog, SequenceDefinition, SequenceStep};
pub use messages::SequencerCommand;
pub use observer::{CompletionReason, SequencerControl, SequencerEvent, SubscriptionId};
pub use sequencer::{IssuedCommand, ProtocolSequencer, RunInfo, RunStatus};
pub use timer::{Deadline, DeadlineId};

use crate::commands::ValveCommandTable;
use crate::config::CatalogSource;
use crate::error::AppResult;
use tracing::info;

/// Protocols plus the valve commands they refer to.
#[derive(Debug, Clone)]
pub struct ValveSetup {
    /// Protocol catalog
    pub catalog: Catalog,
    /// Valve command table
    pub commands: ValveCommandTable,
}

impl ValveSetup {
    /// Load both documents. Nothing is returned unless both parse.
    ///
    /// When `source` points both at one file, that file holds `[[protocol]]`
    /// and `[[command]]` tables together.
    pub fn load(source: &CatalogSource) -> AppResult<Self> {
        let catalog = Catalog::load(&source.protocols)?;
        let commands = ValveCommandTable::load(&source.commands)?;
        info!(
            protocols = catalog.len(),
            commands = commands.len(),
            full = source.is_full_configuration(),
            "Loaded valve setup"
        );
        Ok(Self { catalog, commands })
    }

    /// Build a sequencer over this setup.
    pub fn into_sequencer(self) -> ProtocolSequencer<ValveCommandTable> {
        ProtocolSequencer::with_catalog(self.catalog, self.commands)
    }

    /// Step names used by a protocol that no command defines.
    pub fn unresolved_steps(&self) -> Vec<(String, String)> {
        self.catalog
            .iter()
            .flat_map(|definition| {
                definition
                    .steps()
                    .iter()
                    .filter(|step| self.commands.get(step.name()).is_none())
                    .map(|step| (definition.name().to_string(), step.name().to_string()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl ProtocolSequencer<ValveCommandTable> {
    /// Reload protocols and valve commands together.
    ///
    /// Rejected while a protocol runs. If either document fails to parse the
    /// sequencer keeps its previous catalog and commands.
    pub fn load_full_configuration(&mut self, source: &CatalogSource) -> AppResult<()> {
        if let Some(run) = self.current_run() {
            return Err(crate::error::FluidicsError::ReloadWhileRunning(
                run.protocol.clone(),
            ));
        }
        let setup = ValveSetup::load(source)?;
        self.reconfigure(Some(setup.catalog), Some(setup.commands))
    }
}
