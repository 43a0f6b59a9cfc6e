//! Gateway-wide inactivity tracking.
//!
//! Sessions register with one shared tracker when they are created. Upstream
//! carriers touch the session on every inbound frame; a sweeper task asks
//! idle sessions to PING at half their timeout and force-closes them at the
//! full timeout.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::id::SessionId;
use crate::session::SessionEvent;

#[derive(Debug)]
struct Entry {
    last_activity: Instant,
    timeout: Duration,
    ping_enabled: bool,
    pinged: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Tracks inbound activity of every live session.
#[derive(Debug, Default)]
pub struct InactivityTracker {
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

impl InactivityTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn the sweeper. It stops once the tracker is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    break;
                };
                tracker.sweep(Instant::now());
            }
        })
    }

    pub(crate) fn register(
        &self,
        id: SessionId,
        timeout: Duration,
        ping_enabled: bool,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        let entry = Entry {
            last_activity: Instant::now(),
            timeout,
            ping_enabled,
            pinged: false,
            events,
        };
        self.sessions.lock().insert(id, entry);
    }

    /// Record inbound activity for `id`.
    pub fn touch(&self, id: &SessionId) {
        if let Some(entry) = self.sessions.lock().get_mut(id) {
            entry.last_activity = Instant::now();
            entry.pinged = false;
        }
    }

    /// Stop tracking `id`.
    pub fn unregister(&self, id: &SessionId) {
        self.sessions.lock().remove(id);
    }

    /// Number of tracked sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Check every session against `now`.
    pub fn sweep(&self, now: Instant) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|id, entry| {
            let idle = now.saturating_duration_since(entry.last_activity);
            if idle >= entry.timeout {
                info!(session_id = %id, idle_ms = idle.as_millis() as u64, "Session inactive, closing");
                let _ = entry.events.send(SessionEvent::InactivityTimeout);
                return false;
            }
            if entry.ping_enabled && !entry.pinged && idle >= entry.timeout / 2 {
                debug!(session_id = %id, "Session quiet, sending PING");
                entry.pinged = true;
                if entry.events.send(SessionEvent::SendPing).is_err() {
                    return false;
                }
            }
            !entry.events.is_closed()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(
        tracker: &InactivityTracker,
        ping: bool,
    ) -> (SessionId, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SessionId::generate();
        tracker.register(id.clone(), Duration::from_secs(10), ping, tx);
        (id, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_then_timeout() {
        let tracker = InactivityTracker::new();
        let (_id, mut rx) = register(&tracker, true);

        time::advance(Duration::from_secs(5)).await;
        tracker.sweep(Instant::now());
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::SendPing)));

        // one PING per quiet period
        tracker.sweep(Instant::now());
        assert!(rx.try_recv().is_err());

        time::advance(Duration::from_secs(5)).await;
        tracker.sweep(Instant::now());
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::InactivityTimeout)));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ping_without_accept_commands() {
        let tracker = InactivityTracker::new();
        let (_id, mut rx) = register(&tracker, false);

        time::advance(Duration::from_secs(6)).await;
        tracker.sweep(Instant::now());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_idle_time() {
        let tracker = InactivityTracker::new();
        let (id, mut rx) = register(&tracker, false);

        time::advance(Duration::from_secs(8)).await;
        tracker.touch(&id);
        time::advance(Duration::from_secs(8)).await;
        tracker.sweep(Instant::now());
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_sessions_are_dropped() {
        let tracker = InactivityTracker::new();
        let (_id, rx) = register(&tracker, false);
        drop(rx);
        tracker.sweep(Instant::now());
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_fires_timeout() {
        let tracker = InactivityTracker::new();
        let (_id, mut rx) = register(&tracker, false);
        let sweeper = tracker.spawn_sweeper(Duration::from_secs(1));

        assert!(matches!(rx.recv().await, Some(SessionEvent::InactivityTimeout)));
        sweeper.abort();
    }
}
