//! Tokio driver for [`ProtocolSequencer`].
//!
//! The actor owns the sequencer exclusively and multiplexes three sources in
//! one `select!` loop:
//!
//! - the command mailbox ([`SequencerCommand`])
//! - the armed deadline, if any
//! - a poll interval that republishes the elapsed time of the current step
//!
//! Because a single task handles all three, a deadline expiry and a
//! `stop`/`start` request can never interleave. A deadline that was cancelled
//! or replaced while its sleep was pending is reported with its stale id and
//! ignored by the sequencer.
//!
//! Notifications are fanned out on a broadcast channel; the elapsed time is
//! exposed as a `watch` value.

use super::catalog::Catalog;
use super::messages::SequencerCommand;
use super::observer::SequencerEvent;
use super::sequencer::{IssuedCommand, ProtocolSequencer, RunInfo, RunStatus};
use super::timer::Deadline;
use crate::commands::CommandResolver;
use crate::config::{CatalogSource, SequencerConfig};
use crate::error::{AppResult, FluidicsError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Actor that owns a sequencer and drives its deadlines.
pub struct SequencerActor<R: CommandResolver> {
    sequencer: ProtocolSequencer<R>,
    poll_interval: Duration,
    elapsed_tx: watch::Sender<Option<Duration>>,
}

impl<R: CommandResolver> SequencerActor<R> {
    /// Main actor loop. Returns after `Shutdown` or when every handle is dropped.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<SequencerCommand<R>>) {
        info!("SequencerActor started");

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.sequencer.pending_deadline();

            tokio::select! {
                biased;

                command = command_rx.recv() => match command {
                    Some(SequencerCommand::Shutdown { response }) => {
                        info!("Shutdown command received");
                        self.sequencer.stop();
                        self.publish_elapsed();
                        let _ = response.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("All sequencer handles dropped");
                        self.sequencer.stop();
                        break;
                    }
                },

                _ = wait_for(deadline) => {
                    if let Some(deadline) = deadline {
                        if !self.sequencer.fire_deadline(deadline.id()) {
                            debug!("Ignored stale deadline");
                        }
                    }
                }

                _ = poll.tick() => {}
            }

            self.publish_elapsed();
        }

        info!("SequencerActor shutting down");
    }

    fn handle_command(&mut self, command: SequencerCommand<R>) {
        match command {
            SequencerCommand::Start { index, response } => {
                let _ = response.send(self.sequencer.start(index));
            }
            SequencerCommand::StartByName { name, response } => {
                let _ = response.send(self.sequencer.start_by_name(&name));
            }
            SequencerCommand::Stop { response } => {
                self.sequencer.stop();
                self.publish_elapsed();
                let _ = response.send(());
            }
            SequencerCommand::Advance { response } => {
                let _ = response.send(self.sequencer.advance());
            }
            SequencerCommand::IssueManual {
                step_name,
                response,
            } => {
                let _ = response.send(self.sequencer.issue_manual(&step_name));
            }
            SequencerCommand::LoadCatalog { source, response } => {
                let _ = response.send(self.sequencer.load_catalog(&source));
            }
            SequencerCommand::Reconfigure {
                catalog,
                resolver,
                response,
            } => {
                let _ = response.send(self.sequencer.reconfigure(catalog, resolver));
            }
            SequencerCommand::GetStatus { response } => {
                let _ = response.send(self.sequencer.status());
            }
            SequencerCommand::GetCurrentCommand { response } => {
                let _ = response.send(self.sequencer.current_command().cloned());
            }
            SequencerCommand::GetCurrentRun { response } => {
                let _ = response.send(self.sequencer.current_run().cloned());
            }
            SequencerCommand::GetProtocolNames { response } => {
                let _ = response.send(self.sequencer.protocol_names());
            }
            SequencerCommand::IsValidProtocolName { name, response } => {
                let _ = response.send(self.sequencer.is_valid_protocol_name(&name));
            }
            SequencerCommand::Describe { response } => {
                let _ = response.send(self.sequencer.catalog().describe());
            }
            SequencerCommand::Shutdown { response } => {
                // Handled in `run`.
                let _ = response.send(());
            }
        }
    }

    fn publish_elapsed(&self) {
        let elapsed = self.sequencer.elapsed();
        self.elapsed_tx.send_if_modified(|current| {
            if *current == elapsed {
                false
            } else {
                *current = elapsed;
                true
            }
        });
    }
}

async fn wait_for(deadline: Option<Deadline>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.at()).await,
        None => std::future::pending().await,
    }
}

/// Spawn the actor on the current runtime.
///
/// A forwarding observer is subscribed first so every notification reaches
/// the handle's broadcast channel.
pub fn spawn<R: CommandResolver>(
    mut sequencer: ProtocolSequencer<R>,
    config: &SequencerConfig,
) -> (SequencerHandle<R>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
    let (event_tx, _) = broadcast::channel(config.event_capacity);
    let (elapsed_tx, elapsed_rx) = watch::channel(None);

    let forward = event_tx.clone();
    sequencer.subscribe(move |event: &SequencerEvent<R::Command>, _| {
        // No receivers is fine.
        let _ = forward.send(event.clone());
    });

    let actor = SequencerActor {
        sequencer,
        poll_interval: config.poll_interval,
        elapsed_tx,
    };
    let task = tokio::spawn(actor.run(command_rx));

    (
        SequencerHandle {
            command_tx,
            event_tx,
            elapsed_rx,
        },
        task,
    )
}

/// Cloneable client for a running [`SequencerActor`].
pub struct SequencerHandle<R: CommandResolver> {
    command_tx: mpsc::Sender<SequencerCommand<R>>,
    event_tx: broadcast::Sender<SequencerEvent<R::Command>>,
    elapsed_rx: watch::Receiver<Option<Duration>>,
}

impl<R: CommandResolver> Clone for SequencerHandle<R> {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            event_tx: self.event_tx.clone(),
            elapsed_rx: self.elapsed_rx.clone(),
        }
    }
}

impl<R: CommandResolver> std::fmt::Debug for SequencerHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencerHandle")
            .field("closed", &self.command_tx.is_closed())
            .finish()
    }
}

impl<R: CommandResolver> SequencerHandle<R> {
    async fn request<T>(
        &self,
        (command, response): (SequencerCommand<R>, oneshot::Receiver<T>),
    ) -> AppResult<T> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| FluidicsError::SequencerUnavailable)?;
        response
            .await
            .map_err(|_| FluidicsError::SequencerUnavailable)
    }

    /// Start a protocol by catalog index.
    pub async fn start(&self, index: usize) -> AppResult<()> {
        self.request(SequencerCommand::start(index)).await?
    }

    /// Start a protocol by name.
    pub async fn start_by_name(&self, name: &str) -> AppResult<()> {
        self.request(SequencerCommand::start_by_name(name)).await?
    }

    /// Stop the active run and wait until it is torn down.
    pub async fn stop(&self) -> AppResult<()> {
        self.request(SequencerCommand::stop()).await
    }

    /// Queue a stop without waiting. Usable from synchronous contexts.
    ///
    /// Returns `false` if the mailbox is full or the actor is gone.
    pub fn request_stop(&self) -> bool {
        let (command, _) = SequencerCommand::stop();
        self.command_tx.try_send(command).is_ok()
    }

    /// Skip to the next step.
    pub async fn advance(&self) -> AppResult<bool> {
        self.request(SequencerCommand::advance()).await
    }

    /// Issue a single command outside any protocol.
    pub async fn issue_manual(&self, step_name: &str) -> AppResult<()> {
        self.request(SequencerCommand::issue_manual(step_name)).await?
    }

    /// Reload protocols from disk.
    pub async fn load_catalog(&self, source: CatalogSource) -> AppResult<()> {
        self.request(SequencerCommand::load_catalog(source)).await?
    }

    /// Swap catalog and/or resolver atomically.
    pub async fn reconfigure(&self, catalog: Option<Catalog>, resolver: Option<R>) -> AppResult<()> {
        self.request(SequencerCommand::reconfigure(catalog, resolver))
            .await?
    }

    /// Current run status.
    pub async fn status(&self) -> AppResult<RunStatus> {
        self.request(SequencerCommand::get_status()).await
    }

    /// Most recently issued command.
    pub async fn current_command(&self) -> AppResult<Option<IssuedCommand<R::Command>>> {
        self.request(SequencerCommand::get_current_command()).await
    }

    /// Identity of the active run.
    pub async fn current_run(&self) -> AppResult<Option<RunInfo>> {
        self.request(SequencerCommand::get_current_run()).await
    }

    /// Loaded protocol names.
    pub async fn protocol_names(&self) -> AppResult<Vec<String>> {
        self.request(SequencerCommand::get_protocol_names()).await
    }

    /// Whether a protocol called `name` is loaded.
    pub async fn is_valid_protocol_name(&self, name: &str) -> AppResult<bool> {
        self.request(SequencerCommand::is_valid_protocol_name(name))
            .await
    }

    /// Catalog rendered as text.
    pub async fn describe(&self) -> AppResult<Vec<String>> {
        self.request(SequencerCommand::describe()).await
    }

    /// Stop any run and end the actor task.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(SequencerCommand::shutdown()).await
    }

    /// Receive every notification emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SequencerEvent<R::Command>> {
        self.event_tx.subscribe()
    }

    /// Elapsed time of the current step, refreshed every poll interval.
    pub fn elapsed(&self) -> watch::Receiver<Option<Duration>> {
        self.elapsed_rx.clone()
    }

    /// Whether the actor has exited.
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}
