//! Heartbeat liveness tracking.
//!
//! A probe is sent every interval. The first probe sent while no deadline
//! is armed arms one `timeout` later; any inbound frame disarms it. If the
//! deadline passes the connection is considered dead.

use std::time::Duration;

use tokio::time::{self, Instant};

/// Liveness state for one open socket.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    deadline: Option<Instant>,
    last_traffic: Instant,
    last_sent_at: Option<Instant>,
    last_ack_at: Option<Instant>,
    probes_sent: u64,
}

impl HeartbeatMonitor {
    /// Start tracking a socket that opened at `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            deadline: None,
            last_traffic: now,
            last_sent_at: None,
            last_ack_at: None,
            probes_sent: 0,
        }
    }

    /// Record a probe sent at `now`. Arms the deadline if none is armed.
    pub fn probe_sent(&mut self, now: Instant) {
        self.probes_sent += 1;
        self.last_sent_at = Some(now);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.timeout);
        }
    }

    /// Record inbound traffic at `now`. Disarms the deadline.
    pub fn mark_alive(&mut self, now: Instant) {
        self.last_traffic = now;
        self.deadline = None;
    }

    /// Record a heartbeat echo at `now`. Counts as traffic.
    pub fn ack_received(&mut self, now: Instant) {
        self.mark_alive(now);
        self.last_ack_at = Some(now);
    }

    /// When the last probe went out.
    pub fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }

    /// When the server last echoed a heartbeat.
    pub fn last_ack_at(&self) -> Option<Instant> {
        self.last_ack_at
    }

    /// Armed deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the armed deadline has passed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Time since the last inbound frame.
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_traffic)
    }

    /// Probes sent on this socket.
    pub fn probes_sent(&self) -> u64 {
        self.probes_sent
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Sleep until `deadline`, or forever when unarmed.
pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn first_probe_arms_deadline() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(TIMEOUT, start);
        assert!(monitor.deadline().is_none());

        monitor.probe_sent(start);
        assert_eq!(monitor.deadline(), Some(start + TIMEOUT));
        assert_eq!(monitor.probes_sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn later_probe_keeps_existing_deadline() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(TIMEOUT, start);
        monitor.probe_sent(start);
        monitor.probe_sent(start + Duration::from_secs(5));
        assert_eq!(monitor.deadline(), Some(start + TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_disarms() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(TIMEOUT, start);
        monitor.probe_sent(start);
        monitor.mark_alive(start + Duration::from_secs(3));
        assert!(monitor.deadline().is_none());
        assert!(!monitor.is_expired(start + Duration::from_secs(60)));
        assert_eq!(
            monitor.silence(start + Duration::from_secs(4)),
            Duration::from_secs(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ack_records_time_and_disarms() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(TIMEOUT, start);
        assert!(monitor.last_sent_at().is_none());
        monitor.probe_sent(start);
        assert_eq!(monitor.last_sent_at(), Some(start));

        let echo = start + Duration::from_secs(2);
        monitor.ack_received(echo);
        assert_eq!(monitor.last_ack_at(), Some(echo));
        assert!(monitor.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_at_deadline() {
        let start = Instant::now();
        let mut monitor = HeartbeatMonitor::new(TIMEOUT, start);
        monitor.probe_sent(start);
        assert!(!monitor.is_expired(start + Duration::from_secs(9)));
        assert!(monitor.is_expired(start + TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn unarmed_sleep_never_fires() {
        let fired = time::timeout(Duration::from_secs(3600), sleep_until_deadline(None)).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn armed_sleep_fires_at_deadline() {
        let start = Instant::now();
        sleep_until_deadline(Some(start + TIMEOUT)).await;
        assert!(Instant::now() >= start + TIMEOUT);
    }
}
