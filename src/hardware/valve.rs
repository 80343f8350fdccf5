//! Valve chains.
//!
//! A chain is a daisy-chained set of rotary valves addressed by index. Each
//! valve moves to a 1-based port. Valve commands are applied valve by valve;
//! valves whose position is `Hold` are not touched.

use super::CommandSink;
use crate::commands::{ValveCommand, ValvePosition};
use crate::error::{AppResult, FluidicsError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Contract for a physical valve chain.
#[async_trait]
pub trait ValveChain: Send + Sync {
    /// Number of valves in the chain.
    fn num_valves(&self) -> usize;

    /// Move one valve to `port`.
    async fn set_port(&self, valve: usize, port: u8) -> AppResult<()>;

    /// Current port of one valve.
    async fn port(&self, valve: usize) -> AppResult<u8>;
}

#[async_trait]
impl<V: ValveChain> CommandSink<ValveCommand> for V {
    async fn apply(&self, command: &ValveCommand) -> AppResult<()> {
        if command.positions().len() != self.num_valves() {
            return Err(FluidicsError::Device(format!(
                "command '{}' addresses {} valves, chain has {}",
                command.name(),
                command.positions().len(),
                self.num_valves()
            )));
        }
        for (valve, position) in command.positions().iter().enumerate() {
            if let ValvePosition::Port(port) = position {
                self.set_port(valve, *port).await?;
            }
        }
        debug!(command = %command, "Applied valve command");
        Ok(())
    }
}

/// Simulated valve chain.
///
/// Every valve starts at port 1. Moves take `move_time` (default 0) and are
/// recorded so tests can inspect what reached the hardware.
///
/// # Example
///
/// ```rust,ignore
/// let chain = MockValveChain::new(3, 8);
/// chain.set_port(0, 4).await?;
/// assert_eq!(chain.port(0).await?, 4);
/// ```
#[derive(Debug, Clone)]
pub struct MockValveChain {
    ports: Arc<RwLock<Vec<u8>>>,
    moves: Arc<RwLock<Vec<(usize, u8)>>>,
    num_valves: usize,
    ports_per_valve: u8,
    move_time: Duration,
}

impl MockValveChain {
    /// Chain of `num_valves` valves, each with `ports_per_valve` ports.
    pub fn new(num_valves: usize, ports_per_valve: u8) -> Self {
        Self {
            ports: Arc::new(RwLock::new(vec![1; num_valves])),
            moves: Arc::new(RwLock::new(Vec::new())),
            num_valves,
            ports_per_valve,
            move_time: Duration::ZERO,
        }
    }

    /// Simulate rotation time per move.
    pub fn with_move_time(mut self, move_time: Duration) -> Self {
        self.move_time = move_time;
        self
    }

    /// Current port of every valve.
    pub async fn positions(&self) -> Vec<u8> {
        self.ports.read().await.clone()
    }

    /// Every `(valve, port)` move in order.
    pub async fn moves(&self) -> Vec<(usize, u8)> {
        self.moves.read().await.clone()
    }
}

#[async_trait]
impl ValveChain for MockValveChain {
    fn num_valves(&self) -> usize {
        self.num_valves
    }

    async fn set_port(&self, valve: usize, port: u8) -> AppResult<()> {
        if port == 0 || port > self.ports_per_valve {
            return Err(FluidicsError::Device(format!(
                "valve {valve} has no port {port} (1..={})",
                self.ports_per_valve
            )));
        }
        if valve >= self.num_valves {
            return Err(FluidicsError::Device(format!("no valve {valve}")));
        }

        if !self.move_time.is_zero() {
            sleep(self.move_time).await;
        }

        self.ports.write().await[valve] = port;
        self.moves.write().await.push((valve, port));
        Ok(())
    }

    async fn port(&self, valve: usize) -> AppResult<u8> {
        self.ports
            .read()
            .await
            .get(valve)
            .copied()
            .ok_or_else(|| FluidicsError::Device(format!("no valve {valve}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hold_leaves_valve_alone() {
        let chain = MockValveChain::new(3, 8);
        chain.set_port(1, 6).await.unwrap();

        chain
            .apply(&ValveCommand::new("Buffer A", [2, 0, 5]))
            .await
            .unwrap();
        assert_eq!(chain.positions().await, vec![2, 6, 5]);
        assert_eq!(chain.moves().await, vec![(1, 6), (0, 2), (2, 5)]);
    }

    #[tokio::test]
    async fn test_no_change_touches_nothing() {
        let chain = MockValveChain::new(2, 8);
        chain.apply(&ValveCommand::no_change(2)).await.unwrap();
        assert!(chain.moves().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_commands() {
        let chain = MockValveChain::new(2, 4);
        assert!(matches!(
            chain.apply(&ValveCommand::new("Wide", [1, 1, 1])).await,
            Err(FluidicsError::Device(_))
        ));
        assert!(chain.set_port(0, 9).await.is_err());
        assert!(chain.set_port(5, 1).await.is_err());
        assert!(chain.port(5).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_time() {
        let chain = MockValveChain::new(1, 8).with_move_time(Duration::from_millis(250));
        let started = tokio::time::Instant::now();
        chain.set_port(0, 3).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(chain.port(0).await.unwrap(), 3);
    }
}
