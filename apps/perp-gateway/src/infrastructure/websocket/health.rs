//! Health Monitor
//!
//! Tracks socket activity and periodically asks the connection manager to
//! ping. Staleness is reported, never acted on here; a failed ping is what
//! ends the socket.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Last time anything arrived on the socket.
#[derive(Debug)]
pub struct ActivityTracker {
    last: RwLock<Instant>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    /// Tracker marked active now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: RwLock::new(Instant::now()),
        }
    }

    /// Record activity. Never moves backwards.
    pub fn touch(&self) {
        let now = Instant::now();
        let mut last = self.last.write();
        if now > *last {
            *last = now;
        }
    }

    /// Time of the last activity.
    #[must_use]
    pub fn last(&self) -> Instant {
        *self.last.read()
    }

    /// Time since the last activity.
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.last.read().elapsed()
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Tick interval.
    pub interval: Duration,
    /// Idle time that counts as stale.
    pub stale_after: Duration,
    /// Request a ping on every tick.
    pub send_pings: bool,
}

/// Events emitted by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// Send a ping now.
    SendPing,
    /// Nothing arrived for `idle`.
    Stale {
        /// Time since last activity.
        idle: Duration,
    },
}

/// Periodic socket health check.
pub struct HealthMonitor {
    config: HealthConfig,
    activity: Arc<ActivityTracker>,
    event_tx: mpsc::Sender<HealthEvent>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// Create a monitor bound to one socket session.
    #[must_use]
    pub const fn new(
        config: HealthConfig,
        activity: Arc<ActivityTracker>,
        event_tx: mpsc::Sender<HealthEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            activity,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or the event receiver is dropped.
    pub async fn run(self) {
        let start = Instant::now() + self.config.interval;
        let mut interval = tokio::time::interval_at(start, self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Health monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.check().await {
                        break;
                    }
                }
            }
        }
    }

    async fn check(&self) -> bool {
        let idle = self.activity.idle();
        if idle > self.config.stale_after
            && self.event_tx.send(HealthEvent::Stale { idle }).await.is_err()
        {
            return false;
        }

        if self.config.send_pings && self.event_tx.send(HealthEvent::SendPing).await.is_err() {
            tracing::debug!("Health event channel closed");
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn activity_idle_grows_and_resets() {
        let tracker = ActivityTracker::new();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(tracker.idle() >= Duration::from_secs(3));

        let before = tracker.last();
        tracker.touch();
        assert!(tracker.last() > before);
        assert_eq!(tracker.idle(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_requests_pings() {
        let activity = Arc::new(ActivityTracker::new());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(
            HealthConfig {
                interval: Duration::from_millis(50),
                stale_after: Duration::from_secs(10),
                send_pings: true,
            },
            activity,
            tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(monitor.run());

        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, HealthEvent::SendPing);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_reports_stale_socket() {
        let activity = Arc::new(ActivityTracker::new());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(
            HealthConfig {
                interval: Duration::from_millis(100),
                stale_after: Duration::from_millis(150),
                send_pings: false,
            },
            activity,
            tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(monitor.run());

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, HealthEvent::Stale { idle } if idle > Duration::from_millis(150)));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn monitor_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(
            HealthConfig {
                interval: Duration::from_secs(10),
                stale_after: Duration::from_secs(10),
                send_pings: true,
            },
            Arc::new(ActivityTracker::new()),
            tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(monitor.run());
        cancel.cancel();
        assert!(
            tokio::time::timeout(Duration::from_millis(100), handle)
                .await
                .is_ok()
        );
    }
}
