//! Cancellable timers owned by a session.
//!
//! Each timer is a task that posts an event back to the session when it
//! fires. Re-arming a kind aborts the previous task of that kind.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Timers a session may have armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// First downstream must attach before this fires.
    Connect,
    /// A replacement writer must attach before this fires.
    Reconnect,
    /// The peer must answer our CLOSE before this fires.
    Close,
    /// Periodic keepalive on the current writer.
    Keepalive,
    /// Delayed readiness of the current writer.
    FlushDelay,
    /// Backup NOOP at 2, 4 and 8 times the flush delay.
    FlushBackup(u8),
}

impl TimerKind {
    /// Timers bound to the current writer.
    pub const WRITER: [Self; 5] = [
        Self::Keepalive,
        Self::FlushDelay,
        Self::FlushBackup(1),
        Self::FlushBackup(2),
        Self::FlushBackup(3),
    ];
}

/// The armed timers of one session.
#[derive(Debug)]
pub struct TimerSet<E> {
    events: mpsc::UnboundedSender<E>,
    handles: HashMap<TimerKind, JoinHandle<()>>,
}

impl<E: Send + 'static> TimerSet<E> {
    /// Create an empty set posting to `events`.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<E>) -> Self {
        Self {
            events,
            handles: HashMap::new(),
        }
    }

    /// Post `event` after `delay`.
    pub fn arm(&mut self, kind: TimerKind, delay: Duration, event: E) {
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(event);
        });
        self.replace(kind, handle);
    }

    /// Post `make()` every `period`, first after one period.
    pub fn arm_interval<F>(&mut self, kind: TimerKind, period: Duration, make: F)
    where
        F: Fn() -> E + Send + 'static,
    {
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(make()).is_err() {
                    break;
                }
            }
        });
        self.replace(kind, handle);
    }

    /// Whether `kind` is armed and has not fired yet.
    #[must_use]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.handles
            .get(&kind)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Disarm `kind`.
    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.handles.remove(&kind) {
            handle.abort();
        }
    }

    /// Disarm every timer bound to the current writer.
    pub fn cancel_writer_timers(&mut self) {
        for kind in TimerKind::WRITER {
            self.cancel(kind);
        }
    }

    /// Disarm everything.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    fn replace(&mut self, kind: TimerKind, handle: JoinHandle<()>) {
        if let Some(previous) = self.handles.insert(kind, handle) {
            previous.abort();
        }
    }
}

impl<E> Drop for TimerSet<E> {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_arm_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);
        timers.arm(TimerKind::Close, Duration::from_secs(5), "close");
        assert!(timers.is_armed(TimerKind::Close));

        assert_eq!(rx.recv().await, Some("close"));
        tokio::task::yield_now().await;
        assert!(!timers.is_armed(TimerKind::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);
        timers.arm(TimerKind::Reconnect, Duration::from_secs(1), 1);
        timers.arm(TimerKind::Reconnect, Duration::from_secs(2), 2);

        assert_eq!(rx.recv().await, Some(2));
        time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_writer_timers_leaves_session_timers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);
        timers.arm_interval(TimerKind::Keepalive, Duration::from_secs(1), || "tick");
        timers.arm(TimerKind::FlushBackup(2), Duration::from_secs(1), "backup");
        timers.arm(TimerKind::Connect, Duration::from_secs(3), "connect");

        timers.cancel_writer_timers();
        assert!(!timers.is_armed(TimerKind::Keepalive));
        assert_eq!(rx.recv().await, Some("connect"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticks_repeatedly() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerSet::new(tx);
        timers.arm_interval(TimerKind::Keepalive, Duration::from_secs(1), || "tick");

        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some("tick"));
        }
        timers.cancel_all();
    }
}
