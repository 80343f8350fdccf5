//! Command-line shell for protocol catalogs.
//!
//! ```text
//! rust_fluidics list
//! rust_fluidics show Hybridize
//! rust_fluidics check --illumination config/illumination.toml
//! rust_fluidics run Hybridize
//! rust_fluidics run "Two Color" --illumination config/illumination.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_fluidics::commands::{CommandResolver, IlluminationCommandTable};
use rust_fluidics::config::FluidicsConfig;
use rust_fluidics::hardware::{
    self, AmplitudeModulation, CommandSink, CrystalTechAotf, MockValveChain, SimulatedAotfDriver,
};
use rust_fluidics::logging;
use rust_fluidics::protocol::{self, Catalog, ProtocolSequencer, SequencerEvent, ValveSetup};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(
    name = "rust_fluidics",
    about = "Timed valve and illumination protocols",
    version
)]
struct Cli {
    /// Application configuration file
    #[arg(long, short, global = true, default_value = "config/default_config.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List loaded protocols
    List,

    /// Show the steps of one protocol
    Show {
        /// Protocol name
        name: String,
    },

    /// Validate configuration, protocols and commands
    Check {
        /// Illumination command document to validate against the AOTF channels
        #[arg(long)]
        illumination: Option<PathBuf>,
    },

    /// Run a protocol against simulated hardware
    Run {
        /// Protocol name
        name: String,

        /// Run an illumination protocol from this document instead
        #[arg(long)]
        illumination: Option<PathBuf>,

        /// Ports per simulated valve
        #[arg(long, default_value_t = 8)]
        ports: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = FluidicsConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    logging::init(
        cli.log_level
            .as_deref()
            .unwrap_or(&config.application.log_level),
    );
    info!(app = %config.application.name, "Configuration loaded");

    match cli.command {
        Commands::List => list(&config, cli.json),
        Commands::Show { name } => show(&config, &name),
        Commands::Check { illumination } => check(&config, illumination),
        Commands::Run {
            name,
            illumination: Some(path),
            ..
        } => run_illumination(&config, &name, path, cli.json).await,
        Commands::Run {
            name,
            illumination: None,
            ports,
        } => run_valves(&config, &name, ports, cli.json).await,
    }
}

fn list(config: &FluidicsConfig, json: bool) -> Result<()> {
    let catalog = Catalog::load(&config.paths.protocols)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog.names())?);
        return Ok(());
    }
    for (index, name) in catalog.names().iter().enumerate() {
        println!("{index:>3}  {name}");
    }
    Ok(())
}

fn show(config: &FluidicsConfig, name: &str) -> Result<()> {
    let catalog = Catalog::load(&config.paths.protocols)?;
    let definition = catalog.get(catalog.find_by_name(name)?)?;
    println!("{}", definition.name());
    for step in definition.steps() {
        println!("    {step}");
    }
    println!("    total: {} s", definition.total_duration().as_secs());
    Ok(())
}

fn check(config: &FluidicsConfig, illumination: Option<PathBuf>) -> Result<()> {
    let setup = ValveSetup::load(&config.paths)?;
    println!(
        "{} protocols, {} valve commands over {} valves",
        setup.catalog.len(),
        setup.commands.len(),
        setup.commands.num_valves()
    );

    let mut problems = 0;
    for (protocol, step) in setup.unresolved_steps() {
        println!("unresolved: {protocol} / {step}");
        problems += 1;
    }

    if let Some(path) = illumination {
        let table = IlluminationCommandTable::load(&path)?;
        table.check_channels(config.illumination.channels.iter().map(|c| c.id.as_str()))?;
        let catalog = Catalog::load(&path)?;
        println!(
            "{} illumination protocols, {} illumination commands",
            catalog.len(),
            table.len()
        );
        for definition in catalog.iter() {
            for step in definition.steps() {
                if table.resolve(step.name()).is_err() {
                    println!("unresolved: {} / {}", definition.name(), step.name());
                    problems += 1;
                }
            }
        }
    }

    if problems > 0 {
        bail!("{problems} step(s) do not resolve to a command");
    }
    println!("ok");
    Ok(())
}

async fn run_valves(config: &FluidicsConfig, name: &str, ports: u8, json: bool) -> Result<()> {
    let setup = ValveSetup::load(&config.paths)?;
    let chain = Arc::new(MockValveChain::new(setup.commands.num_valves(), ports));
    drive(setup.into_sequencer(), Arc::clone(&chain), config, name, json).await?;
    println!("final valve ports: {:?}", chain.positions().await);
    Ok(())
}

async fn run_illumination(
    config: &FluidicsConfig,
    name: &str,
    path: PathBuf,
    json: bool,
) -> Result<()> {
    let catalog = Catalog::load(&path)?;
    let table = IlluminationCommandTable::load(&path)?;
    table.check_channels(config.illumination.channels.iter().map(|c| c.id.as_str()))?;

    let driver = SimulatedAotfDriver::new(true);
    let aotf = Arc::new(CrystalTechAotf::new(driver.clone(), &config.illumination).await?);
    drive(
        ProtocolSequencer::with_catalog(catalog, table),
        Arc::clone(&aotf),
        config,
        name,
        json,
    )
    .await?;
    aotf.cleanup().await?;
    debug!(writes = driver.writes().len(), "AOTF session finished");
    Ok(())
}

async fn drive<R, S>(
    sequencer: ProtocolSequencer<R>,
    sink: Arc<S>,
    config: &FluidicsConfig,
    name: &str,
    json: bool,
) -> Result<()>
where
    R: CommandResolver,
    R::Command: Serialize,
    S: CommandSink<R::Command> + 'static,
{
    let (handle, task) = protocol::spawn(sequencer, &config.sequencer);
    let mut events = handle.subscribe();
    let sink_task = hardware::spawn_command_sink(handle.subscribe(), sink);

    handle
        .start_by_name(name)
        .await
        .with_context(|| format!("starting '{name}'"))?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SequencerEvent::CommandReady(issued)) if json => {
                    println!("{}", serde_json::to_string(&issued)?);
                }
                Ok(SequencerEvent::CommandReady(issued)) => {
                    let dwell = issued.dwell.map(|d| d.as_secs());
                    let marker = if issued.resolved { "" } else { " (unresolved, no change)" };
                    match dwell {
                        Some(dwell) => println!("{}: {dwell} s{marker}", issued.step_name),
                        None => println!("{}{marker}", issued.step_name),
                    }
                }
                Ok(SequencerEvent::StatusChanged(status)) => debug!(%status, "Status changed"),
                Ok(SequencerEvent::SequenceCompleted { name, run_id, reason }) => {
                    if json {
                        let summary = serde_json::json!({
                            "completed": name,
                            "run_id": run_id,
                            "reason": reason,
                        });
                        println!("{summary}");
                    } else {
                        println!("{name} {reason} (run {run_id})");
                    }
                    break;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("stopping");
                handle.stop().await?;
            }
        }
    }

    handle.shutdown().await?;
    task.await?;
    drop(handle);
    sink_task.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["rust_fluidics", "list", "--config", "bench.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("bench.toml"));
        assert!(matches!(cli.command, Commands::List));

        let cli = Cli::try_parse_from(["rust_fluidics", "show", "Strip", "-j"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config/default_config.toml"));
        assert!(cli.json);
    }
}
