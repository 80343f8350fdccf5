//! Sequencer notifications and the observer registry.
//!
//! Observers are callbacks invoked synchronously, in subscription order,
//! after each issued step has been recorded and its deadline armed. Each
//! callback gets a [`SequencerControl`] through which it can ask the
//! sequencer to stop; the request is applied as soon as the current batch
//! has been delivered, before any further step is resolved.

use super::sequencer::{IssuedCommand, RunStatus};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Why a run left the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// All steps ran.
    Finished,
    /// `stop()` was called.
    Stopped,
    /// A new `start` preempted the run.
    Interrupted,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CompletionReason::Finished => "finished",
            CompletionReason::Stopped => "stopped",
            CompletionReason::Interrupted => "interrupted",
        };
        f.write_str(text)
    }
}

/// Notification emitted by a sequencer.
#[derive(Debug, Clone)]
pub enum SequencerEvent<C> {
    /// A command was resolved and is ready to be applied to hardware.
    CommandReady(IssuedCommand<C>),
    /// The run status changed.
    StatusChanged(RunStatus),
    /// A run ended.
    SequenceCompleted {
        /// Protocol name
        name: String,
        /// Run that ended
        run_id: Uuid,
        /// How it ended
        reason: CompletionReason,
    },
}

/// Handed to every observer callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequencerControl {
    stop_requested: bool,
}

impl SequencerControl {
    /// Stop the active run once the current notifications are delivered.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    /// Whether any observer asked for a stop.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Boxed observer callback.
pub type ObserverFn<C> = Box<dyn FnMut(&SequencerEvent<C>, &mut SequencerControl) + Send>;

/// Ordered subscribers plus the queue of events not yet delivered.
pub struct Observers<C> {
    entries: Vec<(SubscriptionId, ObserverFn<C>)>,
    pending: VecDeque<SequencerEvent<C>>,
    next_id: u64,
}

impl<C> Default for Observers<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            pending: VecDeque::new(),
            next_id: 0,
        }
    }
}

impl<C> fmt::Debug for Observers<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.entries.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<C> Observers<C> {
    /// Add a subscriber at the end of the delivery order.
    pub fn subscribe(&mut self, observer: ObserverFn<C>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push((id, observer));
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue an event for the next [`dispatch`](Self::dispatch).
    pub fn queue(&mut self, event: SequencerEvent<C>) {
        self.pending.push_back(event);
    }

    /// Whether queued events are waiting.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Deliver queued events, oldest first, each to every subscriber in order.
    pub fn dispatch(&mut self) -> SequencerControl {
        let mut control = SequencerControl::default();
        while let Some(event) = self.pending.pop_front() {
            for (_, observer) in self.entries.iter_mut() {
                observer(&event, &mut control);
            }
        }
        control
    }
}
