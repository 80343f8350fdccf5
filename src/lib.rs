//! Core library for the rust_fluidics application.
//!
//! Timed protocol sequencing for a microscope's fluidics and illumination
//! hardware. A protocol is a named list of steps, each a command name and a
//! dwell in seconds. The [`protocol::ProtocolSequencer`] walks a protocol,
//! resolves each step through a [`commands::CommandResolver`] and announces the
//! resulting command; hardware in [`hardware`] listens and applies it.
//!
//! ```rust,ignore
//! let setup = ValveSetup::load(&config.paths)?;
//! let chain = Arc::new(MockValveChain::new(setup.commands.num_valves(), 8));
//! let (handle, _task) = protocol::spawn(setup.into_sequencer(), &config.sequencer);
//! hardware::spawn_command_sink(handle.subscribe(), chain);
//! handle.start_by_name("Hybridize").await?;
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod protocol;
