//! Common test utilities for rust_fluidics integration tests
//!
//! This module provides reusable test helpers for:
//! - Timing assertions on the paused tokio clock
//! - Locating the sample configuration shipped with the crate
//! - Building sequencers wired to simulated hardware

#![allow(dead_code)] // Not every test binary uses every helper

use rust_fluidics::commands::ValveCommand;
use rust_fluidics::config::{CatalogSource, FluidicsConfig};
use rust_fluidics::protocol::{CompletionReason, SequencerEvent};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

/// Tolerance levels for timing assertions.
#[derive(Debug, Clone, Copy)]
pub enum TimingTolerance {
    /// 1% tolerance - paused clock; covers millisecond timer rounding
    Simulated,
    /// 20% tolerance - real clock, local development
    Normal,
}

impl TimingTolerance {
    /// Get the tolerance factor as a fraction (0.0 to 1.0)
    pub fn factor(&self) -> f64 {
        match self {
            TimingTolerance::Simulated => 0.01,
            TimingTolerance::Normal => 0.20,
        }
    }
}

/// Assert that a duration is within tolerance of an expected value.
pub fn assert_duration_near(
    actual: Duration,
    expected: Duration,
    tolerance: TimingTolerance,
    context: &str,
) {
    let factor = tolerance.factor();
    let min = expected.mul_f64(1.0 - factor);
    let max = expected.mul_f64(1.0 + factor);

    assert!(
        actual >= min && actual <= max,
        "{}: expected {:?} ±{:.0}%, got {:?} (acceptable range: {:?} to {:?})",
        context,
        expected,
        factor * 100.0,
        actual,
        min,
        max
    );
}

/// A file under the crate's `config/` directory.
pub fn config_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("config")
        .join(name)
}

/// The shipped full configuration as a catalog source.
pub fn default_source() -> CatalogSource {
    CatalogSource::full(config_file("default_config.toml"))
}

/// The shipped application configuration.
pub fn default_config() -> FluidicsConfig {
    FluidicsConfig::load_from(config_file("default_config.toml")).unwrap()
}

/// Wait for the next completion, returning everything seen on the way.
pub async fn until_completed<C: Clone>(
    events: &mut broadcast::Receiver<SequencerEvent<C>>,
) -> (Vec<SequencerEvent<C>>, String, CompletionReason) {
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        if let SequencerEvent::SequenceCompleted { name, reason, .. } = &event {
            let (name, reason) = (name.clone(), *reason);
            seen.push(event);
            return (seen, name, reason);
        }
        seen.push(event);
    }
}

/// Step names of the `CommandReady` events in `events`.
pub fn issued_steps<C>(events: &[SequencerEvent<C>]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            SequencerEvent::CommandReady(issued) => Some(issued.step_name.clone()),
            _ => None,
        })
        .collect()
}

/// Positions of a valve command as raw port numbers (0 = hold).
pub fn raw_ports(command: &ValveCommand) -> Vec<u8> {
    use rust_fluidics::commands::ValvePosition;
    command
        .positions()
        .iter()
        .map(|p| match p {
            ValvePosition::Hold => 0,
            ValvePosition::Port(port) => *port,
        })
        .collect()
}
