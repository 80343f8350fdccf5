//! Protocol sequencer state machine.
//!
//! Owns the run status, the deadline timer and the elapsed-time stopwatch.
//! A run walks a protocol's steps in order: each step is resolved through the
//! [`CommandResolver`], cached as the current command, announced to
//! observers, and the deadline is armed for the step's dwell. Expiry of that
//! deadline advances to the next step; running past the last step ends the run.
//!
//! # Transitions
//!
//! | From | Event | To |
//! |---|---|---|
//! | Idle | `start(i)` | Active at step 0 (Idle again if every dwell is 0) |
//! | Active | deadline expiry, more steps | Active at next step |
//! | Active | deadline expiry, last step | Idle, completion `Finished` |
//! | Active | `stop()` | Idle, completion `Stopped` |
//! | Active | `start(j)` | completion `Interrupted` for the old run, then as Idle → `start(j)` |
//! | Idle | `stop()` | Idle, nothing emitted |
//!
//! Zero-dwell steps advance synchronously inside the call that reached them,
//! so a run never stalls on one.
//!
//! The sequencer is synchronous and does not sleep. [`SequencerActor`]
//! drives it on a tokio task; tests drive it directly through
//! [`pending_deadline`] and [`fire_deadline`].
//!
//! [`SequencerActor`]: super::actor::SequencerActor
//! [`pending_deadline`]: ProtocolSequencer::pending_deadline
//! [`fire_deadline`]: ProtocolSequencer::fire_deadline

use super::catalog::{Catalog, SequenceDefinition};
use super::observer::{
    CompletionReason, Observers, SequencerControl, SequencerEvent, SubscriptionId,
};
use super::timer::{Deadline, DeadlineId, DeadlineTimer, Stopwatch};
use crate::commands::CommandResolver;
use crate::config::CatalogSource;
use crate::error::{AppResult, FluidicsError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Live run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// No protocol running
    Idle,
    /// Running `protocol` (catalog index), currently at `step`
    Active {
        /// Catalog index of the running protocol
        protocol: usize,
        /// Index of the step in progress
        step: usize,
    },
}

impl RunStatus {
    /// `(protocol, step)` with `-1` for both when idle.
    pub fn indices(&self) -> (i64, i64) {
        match *self {
            RunStatus::Idle => (-1, -1),
            RunStatus::Active { protocol, step } => (protocol as i64, step as i64),
        }
    }

    /// Whether a protocol is running.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Active { .. })
    }

    /// Catalog index of the running protocol.
    pub fn protocol(&self) -> Option<usize> {
        match *self {
            RunStatus::Idle => None,
            RunStatus::Active { protocol, .. } => Some(protocol),
        }
    }

    /// Step in progress.
    pub fn step(&self) -> Option<usize> {
        match *self {
            RunStatus::Idle => None,
            RunStatus::Active { step, .. } => Some(step),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => f.write_str("idle"),
            RunStatus::Active { protocol, step } => {
                write!(f, "protocol {protocol}, step {step}")
            }
        }
    }
}

/// The most recently issued command.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCommand<C> {
    /// Step name that was resolved
    pub step_name: String,
    /// Resolved command, or the resolver's no-change command
    pub command: C,
    /// False when the step name did not resolve
    pub resolved: bool,
    /// Dwell armed for this step; `None` for manual commands
    pub dwell: Option<Duration>,
    /// Wall-clock issue time
    pub issued_at: DateTime<Utc>,
}

/// Identity of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    /// Unique run id
    pub run_id: Uuid,
    /// Protocol name
    pub protocol: String,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
}

impl RunInfo {
    fn new(protocol: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            protocol: protocol.to_string(),
            started_at: Utc::now(),
        }
    }
}

struct ActiveRun {
    index: usize,
    step: usize,
    definition: Arc<SequenceDefinition>,
    info: RunInfo,
}

/// Drives protocols against a [`CommandResolver`].
pub struct ProtocolSequencer<R: CommandResolver> {
    catalog: Arc<Catalog>,
    resolver: R,
    active: Option<ActiveRun>,
    current: Option<IssuedCommand<R::Command>>,
    deadline: DeadlineTimer,
    stopwatch: Stopwatch,
    observers: Observers<R::Command>,
}

impl<R: CommandResolver> fmt::Debug for ProtocolSequencer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSequencer")
            .field("protocols", &self.catalog.len())
            .field("status", &self.status())
            .field("deadline", &self.deadline.pending())
            .field("observers", &self.observers)
            .finish()
    }
}

impl<R: CommandResolver> ProtocolSequencer<R> {
    /// Create a sequencer with an empty catalog.
    pub fn new(resolver: R) -> Self {
        Self::with_catalog(Catalog::default(), resolver)
    }

    /// Create a sequencer with a loaded catalog.
    pub fn with_catalog(catalog: Catalog, resolver: R) -> Self {
        Self {
            catalog: Arc::new(catalog),
            resolver,
            active: None,
            current: None,
            deadline: DeadlineTimer::new(),
            stopwatch: Stopwatch::new(),
            observers: Observers::default(),
        }
    }

    // ------------------------------------------------------------------
    // Catalog management
    // ------------------------------------------------------------------

    /// Load protocols from `source.protocols`, replacing the catalog.
    ///
    /// # Errors
    ///
    /// - `ReloadWhileRunning` if a protocol is active (nothing is read)
    /// - `Parse` if the document is malformed; the current catalog stays
    pub fn load_catalog(&mut self, source: &CatalogSource) -> AppResult<()> {
        self.ensure_idle_for_reload()?;
        let catalog = Catalog::load(&source.protocols)?;
        self.catalog = Arc::new(catalog);
        Ok(())
    }

    /// Swap in an already-parsed catalog.
    pub fn replace_catalog(&mut self, catalog: Catalog) -> AppResult<()> {
        self.reconfigure(Some(catalog), None)
    }

    /// Swap catalog and/or resolver together. Rejected while a protocol runs.
    pub fn reconfigure(&mut self, catalog: Option<Catalog>, resolver: Option<R>) -> AppResult<()> {
        self.ensure_idle_for_reload()?;
        if let Some(catalog) = catalog {
            self.catalog = Arc::new(catalog);
        }
        if let Some(resolver) = resolver {
            self.resolver = resolver;
        }
        Ok(())
    }

    fn ensure_idle_for_reload(&self) -> AppResult<()> {
        match &self.active {
            Some(run) => {
                warn!(
                    protocol = run.definition.name(),
                    "Reload rejected while protocol is running"
                );
                Err(FluidicsError::ReloadWhileRunning(
                    run.definition.name().to_string(),
                ))
            }
            None => Ok(()),
        }
    }

    /// The loaded catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The command resolver.
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register an observer; delivery follows subscription order.
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&SequencerEvent<R::Command>, &mut SequencerControl) + Send + 'static,
    {
        self.observers.subscribe(Box::new(observer))
    }

    /// Remove an observer.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Start the protocol at `index`, interrupting any active run.
    ///
    /// # Errors
    ///
    /// `IndexOutOfRange` if `index` is not in the catalog. The active run,
    /// if any, is left untouched.
    pub fn start(&mut self, index: usize) -> AppResult<()> {
        let definition = Arc::clone(self.catalog.get(index)?);

        if let Some(run) = &self.active {
            info!(
                protocol = run.definition.name(),
                "Stopping in-progress protocol"
            );
            self.finish_run(CompletionReason::Interrupted);
            self.flush();
        }

        let run_info = RunInfo::new(definition.name());
        if definition.is_empty() {
            info!(protocol = definition.name(), "Protocol has no steps");
            self.observers.queue(SequencerEvent::SequenceCompleted {
                name: definition.name().to_string(),
                run_id: run_info.run_id,
                reason: CompletionReason::Finished,
            });
            self.flush();
            return Ok(());
        }

        info!(
            protocol = definition.name(),
            run_id = %run_info.run_id,
            steps = definition.len(),
            "Starting protocol"
        );
        self.active = Some(ActiveRun {
            index,
            step: 0,
            definition,
            info: run_info,
        });
        self.observers
            .queue(SequencerEvent::StatusChanged(self.status()));
        self.issue_current_step();
        self.settle();
        Ok(())
    }

    /// Start the first protocol called `name`, interrupting any active run.
    ///
    /// # Errors
    ///
    /// `ProtocolNotFound` if no protocol has that name.
    pub fn start_by_name(&mut self, name: &str) -> AppResult<()> {
        let index = self.catalog.find_by_name(name).map_err(|e| {
            debug!(protocol = name, "Not a valid protocol");
            e
        })?;
        self.start(index)
    }

    /// Stop the active run. A no-op when idle.
    pub fn stop(&mut self) {
        if self.active.is_some() {
            self.finish_run(CompletionReason::Stopped);
            self.flush();
        }
    }

    /// Advance the active run to its next step now, as if its deadline expired.
    ///
    /// Returns `false` when idle.
    pub fn advance(&mut self) -> bool {
        if self.active.is_none() {
            return false;
        }
        self.deadline.cancel();
        self.advance_step();
        self.settle();
        true
    }

    /// Report expiry of a deadline. Stale ids are ignored and return `false`.
    pub fn fire_deadline(&mut self, id: DeadlineId) -> bool {
        if !self.deadline.expire(id) {
            return false;
        }
        self.advance_step();
        self.settle();
        true
    }

    /// Resolve and issue a single command outside any protocol.
    ///
    /// The deadline is never armed for a manual command.
    ///
    /// # Errors
    ///
    /// `ManualCommandWhileRunning` while a protocol is active.
    pub fn issue_manual(&mut self, step_name: &str) -> AppResult<()> {
        if let Some(run) = &self.active {
            return Err(FluidicsError::ManualCommandWhileRunning(
                run.definition.name().to_string(),
            ));
        }
        self.issue_command(step_name, None);
        self.flush();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current run status.
    pub fn status(&self) -> RunStatus {
        match &self.active {
            Some(run) => RunStatus::Active {
                protocol: run.index,
                step: run.step,
            },
            None => RunStatus::Idle,
        }
    }

    /// Most recently issued command.
    pub fn current_command(&self) -> Option<&IssuedCommand<R::Command>> {
        self.current.as_ref()
    }

    /// Whether a protocol is running.
    pub fn is_running_protocol(&self) -> bool {
        self.active.is_some()
    }

    /// Whether a protocol called `name` is loaded.
    pub fn is_valid_protocol_name(&self, name: &str) -> bool {
        let valid = self.catalog.contains(name);
        if !valid {
            debug!(protocol = name, "Not a valid protocol");
        }
        valid
    }

    /// Loaded protocol names in catalog order.
    pub fn protocol_names(&self) -> Vec<String> {
        self.catalog.names()
    }

    /// Number of loaded protocols.
    pub fn num_protocols(&self) -> usize {
        self.catalog.len()
    }

    /// Identity of the active run.
    pub fn current_run(&self) -> Option<&RunInfo> {
        self.active.as_ref().map(|run| &run.info)
    }

    /// Definition of the active protocol.
    pub fn active_protocol(&self) -> Option<&Arc<SequenceDefinition>> {
        self.active.as_ref().map(|run| &run.definition)
    }

    /// The armed deadline, if any.
    pub fn pending_deadline(&self) -> Option<Deadline> {
        self.deadline.pending()
    }

    /// Time since the last issued protocol step; `None` when no run is in
    /// progress. Manual commands do not start it.
    pub fn elapsed(&self) -> Option<Duration> {
        self.stopwatch.elapsed()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn issue_current_step(&mut self) {
        let Some(run) = &self.active else {
            return;
        };
        let Some(step) = run.definition.step(run.step) else {
            return;
        };
        let (name, dwell) = (step.name().to_string(), step.duration());
        self.issue_command(&name, Some(dwell));
    }

    fn issue_command(&mut self, step_name: &str, dwell: Option<Duration>) {
        let (command, resolved) = match self.resolver.resolve(step_name) {
            Ok(command) => (command, true),
            Err(err) => {
                warn!(
                    step = step_name,
                    error = %err,
                    "Did not find command; issuing no-change command"
                );
                (self.resolver.no_change(), false)
            }
        };

        match dwell {
            Some(dwell) if !dwell.is_zero() => {
                debug!(step = step_name, dwell_s = dwell.as_secs(), "Issued")
            }
            _ => debug!(step = step_name, "Issued"),
        }

        self.resolver.command_issued(step_name, &command);
        let issued = IssuedCommand {
            step_name: step_name.to_string(),
            command,
            resolved,
            dwell,
            issued_at: Utc::now(),
        };
        self.current = Some(issued.clone());
        if dwell.is_some() {
            self.stopwatch.restart();
        }
        self.observers.queue(SequencerEvent::CommandReady(issued));

        if let Some(dwell) = dwell {
            self.deadline.arm(dwell);
        }
    }

    fn advance_step(&mut self) {
        let has_next = match self.active.as_mut() {
            Some(run) if run.step + 1 < run.definition.len() => {
                run.step += 1;
                true
            }
            Some(_) => false,
            None => return,
        };

        if has_next {
            self.observers
                .queue(SequencerEvent::StatusChanged(self.status()));
            self.issue_current_step();
        } else {
            self.finish_run(CompletionReason::Finished);
        }
    }

    // Deliver the step just issued, then consume zero-dwell deadlines one step
    // at a time until a positive dwell is armed or the run ends. An observer
    // stop lands before the next step is resolved.
    fn settle(&mut self) {
        self.flush();
        while let Some(deadline) = self.deadline.pending() {
            if !deadline.duration().is_zero() {
                break;
            }
            self.deadline.cancel();
            self.advance_step();
            self.flush();
        }
    }

    fn finish_run(&mut self, reason: CompletionReason) {
        // Deadline goes first: nothing may fire against the status being torn down.
        self.deadline.cancel();
        self.stopwatch.stop();

        if let Some(run) = self.active.take() {
            info!(
                protocol = run.definition.name(),
                run_id = %run.info.run_id,
                %reason,
                "Protocol ended"
            );
            self.observers.queue(SequencerEvent::SequenceCompleted {
                name: run.definition.name().to_string(),
                run_id: run.info.run_id,
                reason,
            });
            self.observers
                .queue(SequencerEvent::StatusChanged(RunStatus::Idle));
        }
    }

    fn flush(&mut self) {
        while self.observers.has_pending() {
            let control = self.observers.dispatch();
            if control.stop_requested() && self.active.is_some() {
                debug!("Observer requested stop");
                self.finish_run(CompletionReason::Stopped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ValveCommand, ValveCommandTable};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    fn flow_catalog() -> Catalog {
        Catalog::new([
            SequenceDefinition::new("Flow", [("A", 2), ("B", 0), ("C", 3)]),
            SequenceDefinition::new("Rinse", [("Wash", 10)]),
        ])
    }

    fn table() -> ValveCommandTable {
        ValveCommandTable::new(vec![
            ValveCommand::new("A", [1, 0]),
            ValveCommand::new("B", [2, 0]),
            ValveCommand::new("C", [0, 3]),
            ValveCommand::new("Wash", [4, 4]),
        ])
        .unwrap()
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn sequencer_with_log() -> (ProtocolSequencer<ValveCommandTable>, Log) {
        let mut sequencer = ProtocolSequencer::with_catalog(flow_catalog(), table());
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        sequencer.subscribe(move |event, _| {
            let entry = match event {
                SequencerEvent::CommandReady(issued) => format!("ready {}", issued.step_name),
                SequencerEvent::StatusChanged(status) => format!("status {status}"),
                SequencerEvent::SequenceCompleted { name, reason, .. } => {
                    format!("completed {name} {reason}")
                }
            };
            sink.lock().unwrap().push(entry);
        });
        (sequencer, log)
    }

    fn fire(sequencer: &mut ProtocolSequencer<ValveCommandTable>) -> bool {
        let deadline = sequencer.pending_deadline().expect("deadline armed");
        sequencer.fire_deadline(deadline.id())
    }

    fn completions(log: &Log) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("completed"))
            .cloned()
            .collect()
    }

    #[test]
    fn test_start_positive_first_step() {
        let (mut sequencer, _) = sequencer_with_log();
        sequencer.start(1).unwrap();

        assert_eq!(sequencer.status().indices(), (1, 0));
        assert!(sequencer.is_running_protocol());
        let deadline = sequencer.pending_deadline().unwrap();
        assert_eq!(deadline.duration(), Duration::from_secs(10));
        assert_eq!(sequencer.current_command().unwrap().step_name, "Wash");
    }

    #[test]
    fn test_flow_scenario() {
        let (mut sequencer, log) = sequencer_with_log();

        sequencer.start(0).unwrap();
        assert_eq!(sequencer.status().indices(), (0, 0));
        assert_eq!(sequencer.current_command().unwrap().command.name(), "A");
        assert_eq!(
            sequencer.pending_deadline().unwrap().duration(),
            Duration::from_secs(2)
        );

        // A expires: B is issued and, with a zero dwell, C follows at once.
        assert!(fire(&mut sequencer));
        assert_eq!(sequencer.status().indices(), (0, 2));
        assert_eq!(sequencer.current_command().unwrap().step_name, "C");
        assert_eq!(
            sequencer.pending_deadline().unwrap().duration(),
            Duration::from_secs(3)
        );

        assert!(fire(&mut sequencer));
        assert_eq!(sequencer.status(), RunStatus::Idle);
        assert_eq!(sequencer.status().indices(), (-1, -1));
        assert!(sequencer.pending_deadline().is_none());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "status protocol 0, step 0",
                "ready A",
                "status protocol 0, step 1",
                "ready B",
                "status protocol 0, step 2",
                "ready C",
                "completed Flow finished",
                "status idle",
            ]
        );
    }

    #[test]
    fn test_zero_dwell_prefix_runs_synchronously() {
        let catalog = Catalog::new([SequenceDefinition::new(
            "Prime",
            [("A", 0), ("B", 0), ("C", 5)],
        )]);
        let mut sequencer = ProtocolSequencer::with_catalog(catalog, table());
        sequencer.start(0).unwrap();

        assert_eq!(sequencer.status().indices(), (0, 2));
        assert_eq!(
            sequencer.pending_deadline().unwrap().duration(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_all_zero_dwell_completes_within_start() {
        let catalog = Catalog::new([SequenceDefinition::new("Pulse", [("A", 0), ("B", 0)])]);
        let mut sequencer = ProtocolSequencer::with_catalog(catalog, table());
        let done = Arc::new(Mutex::new(Vec::new()));
        let sink = done.clone();
        sequencer.subscribe(move |event, _| {
            if let SequencerEvent::SequenceCompleted { name, .. } = event {
                sink.lock().unwrap().push(name.clone());
            }
        });

        sequencer.start(0).unwrap();
        assert_eq!(sequencer.status(), RunStatus::Idle);
        assert!(sequencer.pending_deadline().is_none());
        assert_eq!(sequencer.current_command().unwrap().step_name, "B");
        assert_eq!(*done.lock().unwrap(), vec!["Pulse"]);
    }

    #[test]
    fn test_stop_is_idempotent_from_idle() {
        let (mut sequencer, log) = sequencer_with_log();
        sequencer.stop();
        sequencer.stop();
        assert_eq!(sequencer.status(), RunStatus::Idle);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_cancels_deadline_and_reports() {
        let (mut sequencer, log) = sequencer_with_log();
        sequencer.start(0).unwrap();
        let stale = sequencer.pending_deadline().unwrap();

        sequencer.stop();
        assert_eq!(sequencer.status(), RunStatus::Idle);
        assert!(sequencer.pending_deadline().is_none());
        assert!(!sequencer.fire_deadline(stale.id()));
        assert_eq!(completions(&log), vec!["completed Flow stopped"]);
        assert!(sequencer.elapsed().is_none());
    }

    #[test]
    fn test_start_while_active_interrupts_once() {
        let (mut sequencer, log) = sequencer_with_log();
        sequencer.start(0).unwrap();
        let first_deadline = sequencer.pending_deadline().unwrap();

        sequencer.start(1).unwrap();
        assert_eq!(sequencer.status().indices(), (1, 0));
        assert_eq!(completions(&log), vec!["completed Flow interrupted"]);

        // The preempted run's deadline can no longer advance anything.
        assert!(!sequencer.fire_deadline(first_deadline.id()));
        assert_eq!(sequencer.status().indices(), (1, 0));
    }

    #[test]
    fn test_start_out_of_range_leaves_status() {
        let (mut sequencer, log) = sequencer_with_log();
        assert!(matches!(
            sequencer.start(5),
            Err(FluidicsError::IndexOutOfRange { index: 5, len: 2 })
        ));
        assert_eq!(sequencer.status(), RunStatus::Idle);

        sequencer.start(0).unwrap();
        assert!(sequencer.start(5).is_err());
        assert_eq!(sequencer.status().indices(), (0, 0));
        assert!(completions(&log).is_empty());
    }

    #[test]
    fn test_start_by_name() {
        let (mut sequencer, _) = sequencer_with_log();
        sequencer.start_by_name("Rinse").unwrap();
        assert_eq!(sequencer.status().protocol(), Some(1));
        assert_eq!(sequencer.current_run().unwrap().protocol, "Rinse");

        assert!(matches!(
            sequencer.start_by_name("Nope"),
            Err(FluidicsError::ProtocolNotFound(_))
        ));
        assert_eq!(sequencer.status().protocol(), Some(1));
        assert!(sequencer.is_valid_protocol_name("Flow"));
        assert!(!sequencer.is_valid_protocol_name("Nope"));
    }

    #[test]
    fn test_unresolved_step_keeps_schedule() {
        let catalog = Catalog::new([SequenceDefinition::new(
            "Typo",
            [("Bufer A", 4), ("C", 1)],
        )]);
        let mut sequencer = ProtocolSequencer::with_catalog(catalog, table());
        sequencer.start(0).unwrap();

        let issued = sequencer.current_command().unwrap();
        assert!(!issued.resolved);
        assert!(issued.command.is_no_change());
        assert_eq!(issued.command.positions().len(), 2);
        assert_eq!(
            sequencer.pending_deadline().unwrap().duration(),
            Duration::from_secs(4)
        );

        assert!(fire(&mut sequencer));
        assert_eq!(sequencer.status().indices(), (0, 1));
        assert!(sequencer.current_command().unwrap().resolved);
    }

    #[test]
    #[traced_test]
    fn test_unresolved_step_is_logged() {
        let catalog = Catalog::new([SequenceDefinition::new("Typo", [("Bufer A", 4)])]);
        let mut sequencer = ProtocolSequencer::with_catalog(catalog, table());
        sequencer.start(0).unwrap();
        assert!(logs_contain("Did not find command"));
        assert!(logs_contain("Bufer A"));
    }

    #[test]
    fn test_empty_protocol_reports_completion() {
        let catalog = Catalog::new([SequenceDefinition::new("Nothing", Vec::<(&str, u64)>::new())]);
        let mut sequencer = ProtocolSequencer::with_catalog(catalog, table());
        let events = Arc::new(Mutex::new(0usize));
        let counter = events.clone();
        sequencer.subscribe(move |event, _| {
            if matches!(event, SequencerEvent::SequenceCompleted { .. }) {
                *counter.lock().unwrap() += 1;
            }
        });

        sequencer.start(0).unwrap();
        assert_eq!(sequencer.status(), RunStatus::Idle);
        assert_eq!(*events.lock().unwrap(), 1);
    }

    #[test]
    fn test_observer_stop_during_start() {
        let (mut sequencer, log) = sequencer_with_log();
        sequencer.subscribe(|event, control| {
            if let SequencerEvent::CommandReady(issued) = event {
                if issued.step_name == "A" {
                    control.stop();
                }
            }
        });

        sequencer.start(0).unwrap();
        assert_eq!(sequencer.status(), RunStatus::Idle);
        assert!(sequencer.pending_deadline().is_none());
        assert_eq!(completions(&log), vec!["completed Flow stopped"]);
    }

    #[test]
    fn test_observer_stop_skips_rest_of_zero_dwell_chain() {
        let catalog = Catalog::new([SequenceDefinition::new(
            "Prime",
            [("A", 0), ("B", 0), ("C", 5)],
        )]);
        let mut sequencer = ProtocolSequencer::with_catalog(catalog, table());
        let issued = Arc::new(Mutex::new(Vec::new()));
        let sink = issued.clone();
        sequencer.subscribe(move |event, control| {
            if let SequencerEvent::CommandReady(command) = event {
                sink.lock().unwrap().push(command.step_name.clone());
                if command.step_name == "A" {
                    control.stop();
                }
            }
        });

        sequencer.start(0).unwrap();
        assert_eq!(*issued.lock().unwrap(), vec!["A"]);
        assert_eq!(sequencer.status(), RunStatus::Idle);
        assert!(sequencer.pending_deadline().is_none());
        assert_eq!(sequencer.current_command().unwrap().step_name, "A");
    }

    #[test]
    fn test_stop_on_interrupt_spares_new_run() {
        let (mut sequencer, log) = sequencer_with_log();
        sequencer.subscribe(|event, control| {
            if let SequencerEvent::SequenceCompleted { reason, .. } = event {
                if *reason == CompletionReason::Interrupted {
                    control.stop();
                }
            }
        });

        sequencer.start(0).unwrap();
        sequencer.start(1).unwrap();
        assert_eq!(sequencer.status().indices(), (1, 0));
        assert!(sequencer.pending_deadline().is_some());
        assert_eq!(completions(&log), vec!["completed Flow interrupted"]);
    }

    #[test]
    fn test_manual_advance() {
        let (mut sequencer, _) = sequencer_with_log();
        assert!(!sequencer.advance());

        sequencer.start(0).unwrap();
        assert!(sequencer.advance());
        assert_eq!(sequencer.status().indices(), (0, 2));
        assert!(sequencer.advance());
        assert_eq!(sequencer.status(), RunStatus::Idle);
    }

    #[test]
    fn test_manual_command() {
        let (mut sequencer, log) = sequencer_with_log();
        sequencer.issue_manual("Wash").unwrap();

        assert_eq!(sequencer.status(), RunStatus::Idle);
        assert!(sequencer.pending_deadline().is_none());
        let issued = sequencer.current_command().unwrap();
        assert_eq!(issued.command.name(), "Wash");
        assert_eq!(issued.dwell, None);
        assert_eq!(*log.lock().unwrap(), vec!["ready Wash"]);
        assert!(sequencer.elapsed().is_none());

        sequencer.start(1).unwrap();
        assert!(matches!(
            sequencer.issue_manual("A"),
            Err(FluidicsError::ManualCommandWhileRunning(name)) if name == "Rinse"
        ));
    }

    #[test]
    fn test_reload_rejected_while_running() {
        let (mut sequencer, _) = sequencer_with_log();
        sequencer.start(0).unwrap();

        let result = sequencer.replace_catalog(Catalog::default());
        assert!(matches!(result, Err(FluidicsError::ReloadWhileRunning(_))));
        assert_eq!(sequencer.num_protocols(), 2);
        assert_eq!(sequencer.status().indices(), (0, 0));

        sequencer.stop();
        sequencer.replace_catalog(Catalog::default()).unwrap();
        assert_eq!(sequencer.num_protocols(), 0);
    }

    #[test]
    fn test_failed_load_keeps_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[[protocol]]\nname = \"X\"\ncommands = [{ name = \"A\" }]\n").unwrap();

        let (mut sequencer, _) = sequencer_with_log();
        let result = sequencer.load_catalog(&CatalogSource::full(&path));
        assert!(matches!(result, Err(FluidicsError::Parse { .. })));
        assert_eq!(sequencer.protocol_names(), vec!["Flow", "Rinse"]);

        std::fs::write(&path, "[[protocol]]\nname = \"Y\"\ncommands = [{ name = \"A\", duration = 1 }]\n").unwrap();
        sequencer.load_catalog(&CatalogSource::full(&path)).unwrap();
        assert_eq!(sequencer.protocol_names(), vec!["Y"]);
    }
}
