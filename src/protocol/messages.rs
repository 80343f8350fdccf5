//! Message types for actor-based communication
//!
//! Commands accepted by [`SequencerActor`](super::actor::SequencerActor). Every
//! request carries a oneshot `response` sender; the actor answers once the
//! sequencer has fully settled the transition the request caused.

use super::catalog::Catalog;
use super::sequencer::{IssuedCommand, RunInfo, RunStatus};
use crate::commands::CommandResolver;
use crate::config::CatalogSource;
use crate::error::AppResult;
use std::fmt;
use tokio::sync::oneshot;

/// Commands that can be sent to the sequencer actor
pub enum SequencerCommand<R: CommandResolver> {
    /// Start a protocol by catalog index
    Start {
        index: usize,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Start a protocol by name
    StartByName {
        name: String,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Stop the active run
    Stop { response: oneshot::Sender<()> },

    /// Skip to the next step of the active run
    Advance { response: oneshot::Sender<bool> },

    /// Issue one command outside any protocol
    IssueManual {
        step_name: String,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Reload protocols from disk
    LoadCatalog {
        source: CatalogSource,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Swap in a parsed catalog and/or resolver
    Reconfigure {
        catalog: Option<Catalog>,
        resolver: Option<R>,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Get the run status
    GetStatus {
        response: oneshot::Sender<RunStatus>,
    },

    /// Get the most recently issued command
    GetCurrentCommand {
        response: oneshot::Sender<Option<IssuedCommand<R::Command>>>,
    },

    /// Get the active run's identity
    GetCurrentRun {
        response: oneshot::Sender<Option<RunInfo>>,
    },

    /// Get loaded protocol names
    GetProtocolNames {
        response: oneshot::Sender<Vec<String>>,
    },

    /// Check a protocol name
    IsValidProtocolName {
        name: String,
        response: oneshot::Sender<bool>,
    },

    /// Render the catalog as text
    Describe {
        response: oneshot::Sender<Vec<String>>,
    },

    /// Stop any run and end the actor
    Shutdown { response: oneshot::Sender<()> },
}

impl<R: CommandResolver> fmt::Debug for SequencerCommand<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start { .. } => "Start",
            Self::StartByName { .. } => "StartByName",
            Self::Stop { .. } => "Stop",
            Self::Advance { .. } => "Advance",
            Self::IssueManual { .. } => "IssueManual",
            Self::LoadCatalog { .. } => "LoadCatalog",
            Self::Reconfigure { .. } => "Reconfigure",
            Self::GetStatus { .. } => "GetStatus",
            Self::GetCurrentCommand { .. } => "GetCurrentCommand",
            Self::GetCurrentRun { .. } => "GetCurrentRun",
            Self::GetProtocolNames { .. } => "GetProtocolNames",
            Self::IsValidProtocolName { .. } => "IsValidProtocolName",
            Self::Describe { .. } => "Describe",
            Self::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl<R: CommandResolver> SequencerCommand<R> {
    /// Helper to create a Start command
    pub fn start(index: usize) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Start { index, response: tx }, rx)
    }

    /// Helper to create a StartByName command
    pub fn start_by_name(name: impl Into<String>) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::StartByName {
                name: name.into(),
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Stop command
    pub fn stop() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }

    /// Helper to create an Advance command
    pub fn advance() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self::Advance { response: tx }, rx)
    }

    /// Helper to create an IssueManual command
    pub fn issue_manual(step_name: impl Into<String>) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::IssueManual {
                step_name: step_name.into(),
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a LoadCatalog command
    pub fn load_catalog(source: CatalogSource) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::LoadCatalog { source, response: tx }, rx)
    }

    /// Helper to create a Reconfigure command
    pub fn reconfigure(
        catalog: Option<Catalog>,
        resolver: Option<R>,
    ) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Reconfigure {
                catalog,
                resolver,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a GetStatus command
    pub fn get_status() -> (Self, oneshot::Receiver<RunStatus>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStatus { response: tx }, rx)
    }

    /// Helper to create a GetCurrentCommand command
    pub fn get_current_command() -> (Self, oneshot::Receiver<Option<IssuedCommand<R::Command>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetCurrentCommand { response: tx }, rx)
    }

    /// Helper to create a GetCurrentRun command
    pub fn get_current_run() -> (Self, oneshot::Receiver<Option<RunInfo>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetCurrentRun { response: tx }, rx)
    }

    /// Helper to create a GetProtocolNames command
    pub fn get_protocol_names() -> (Self, oneshot::Receiver<Vec<String>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetProtocolNames { response: tx }, rx)
    }

    /// Helper to create an IsValidProtocolName command
    pub fn is_valid_protocol_name(name: impl Into<String>) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::IsValidProtocolName {
                name: name.into(),
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Describe command
    pub fn describe() -> (Self, oneshot::Receiver<Vec<String>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Describe { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
