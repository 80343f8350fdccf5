//! Deadline timer and elapsed-time stopwatch.
//!
//! Both are plain state: nothing here sleeps. The sequencer arms and cancels
//! the [`DeadlineTimer`]; whoever drives the sequencer (the actor loop, or a
//! test) waits for [`Deadline::at`] and reports expiry back with the
//! deadline's id. An expiry carrying a stale id is ignored, so at most one
//! armed deadline can ever cause an advance.
//!
//! The [`Stopwatch`] is observability only. It restarts whenever a step is
//! issued and has no bearing on when the sequencer advances.

use std::time::Duration;
use tokio::time::Instant;

// Stand-in expiry for dwells too long to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Identifies one arming of a [`DeadlineTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeadlineId(u64);

/// An armed one-shot deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    id: DeadlineId,
    armed_at: Instant,
    duration: Duration,
}

impl Deadline {
    /// Which arming this is.
    pub fn id(&self) -> DeadlineId {
        self.id
    }

    /// When the deadline expires.
    ///
    /// A dwell that overflows `Instant` expires roughly 30 years out.
    pub fn at(&self) -> Instant {
        self.armed_at
            .checked_add(self.duration)
            .unwrap_or_else(|| self.armed_at + FAR_FUTURE)
    }

    /// Dwell the deadline was armed for.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time left before expiry, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.at().saturating_duration_since(Instant::now())
    }
}

/// Single-shot timer with at most one pending deadline.
#[derive(Debug, Default)]
pub struct DeadlineTimer {
    armed: Option<Deadline>,
    next_id: u64,
}

impl DeadlineTimer {
    /// Create a disarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `duration`, replacing any pending deadline.
    pub fn arm(&mut self, duration: Duration) -> Deadline {
        self.next_id += 1;
        let deadline = Deadline {
            id: DeadlineId(self.next_id),
            armed_at: Instant::now(),
            duration,
        };
        self.armed = Some(deadline);
        deadline
    }

    /// Disarm, returning the deadline that was pending.
    pub fn cancel(&mut self) -> Option<Deadline> {
        self.armed.take()
    }

    /// The pending deadline, if armed.
    pub fn pending(&self) -> Option<Deadline> {
        self.armed
    }

    /// Whether a deadline is pending.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Consume an expiry. Returns `true` and disarms only if `id` is the
    /// pending deadline.
    pub fn expire(&mut self, id: DeadlineId) -> bool {
        match self.armed {
            Some(deadline) if deadline.id == id => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}

/// Free-running stopwatch reset on every issued step.
#[derive(Debug, Default)]
pub struct Stopwatch {
    started: Option<Instant>,
}

impl Stopwatch {
    /// Create a stopped stopwatch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from zero (restarting if already running).
    pub fn restart(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Stop; [`elapsed`](Self::elapsed) reports `None` until restarted.
    pub fn stop(&mut self) {
        self.started = None;
    }

    /// Whether the stopwatch is running.
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Time since the last restart.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|started| started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rearm_replaces_pending() {
        let mut timer = DeadlineTimer::new();
        let first = timer.arm(Duration::from_secs(2));
        let second = timer.arm(Duration::from_secs(3));

        assert_ne!(first.id(), second.id());
        assert_eq!(timer.pending(), Some(second));
        assert!(!timer.expire(first.id()), "stale expiry must be ignored");
        assert!(timer.is_armed());
        assert!(timer.expire(second.id()));
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_cancel_disarms() {
        let mut timer = DeadlineTimer::new();
        let deadline = timer.arm(Duration::from_secs(1));
        assert_eq!(timer.cancel(), Some(deadline));
        assert!(!timer.expire(deadline.id()));
        assert_eq!(timer.cancel(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_instant() {
        let mut timer = DeadlineTimer::new();
        let deadline = timer.arm(Duration::from_secs(5));
        assert_eq!(deadline.remaining(), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(deadline.remaining(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_dwell_expires_far_out() {
        let mut timer = DeadlineTimer::new();
        let deadline = timer.arm(Duration::from_secs(i64::MAX as u64));
        assert!(deadline.remaining() >= Duration::from_secs(86400 * 365 * 29));
        assert!(deadline.at() > Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopwatch_restarts_from_zero() {
        let mut watch = Stopwatch::new();
        assert_eq!(watch.elapsed(), None);

        watch.restart();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(watch.elapsed(), Some(Duration::from_secs(4)));

        watch.restart();
        assert_eq!(watch.elapsed(), Some(Duration::ZERO));

        watch.stop();
        assert!(!watch.is_running());
    }
}
