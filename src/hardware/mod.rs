//! Hardware collaborators that carry out issued commands.
//!
//! The sequencer never touches a device. Devices listen on a sequencer's
//! notification channel and apply every `CommandReady` they see through
//! [`CommandSink`].
//!
//! - [`valve`] - valve chains and the mock chain
//! - [`aotf`] - acousto-optic tunable filters and the emulator

pub mod aotf;
pub mod valve;

use crate::error::AppResult;
use crate::protocol::SequencerEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub use aotf::{AmplitudeModulation, AotfDriver, CrystalTechAotf, NoneAotf, SimulatedAotfDriver};
pub use valve::{MockValveChain, ValveChain};

/// Something that can execute a resolved command.
#[async_trait]
pub trait CommandSink<C>: Send + Sync {
    /// Apply one command to the hardware.
    async fn apply(&self, command: &C) -> AppResult<()>;
}

/// Apply every `CommandReady` from `events` to `sink` until the channel closes.
///
/// Device failures are logged and do not stop the task; the sequencer keeps
/// its schedule regardless of what the hardware does.
pub fn spawn_command_sink<C, S>(
    mut events: broadcast::Receiver<SequencerEvent<C>>,
    sink: Arc<S>,
) -> JoinHandle<()>
where
    C: Clone + Send + Sync + 'static,
    S: CommandSink<C> + ?Sized + 'static,
{
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SequencerEvent::CommandReady(issued)) => {
                    if let Err(e) = sink.apply(&issued.command).await {
                        error!(step = %issued.step_name, error = %e, "Failed to apply command");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Command sink fell behind; commands were dropped");
                }
                Err(RecvError::Closed) => {
                    debug!("Event channel closed, stopping command sink");
                    break;
                }
            }
        }
    })
}
