use std::time::{Duration, Instant};

/// Derives peer liveness from traffic recency. Any received frame counts as
/// proof of life, not only heartbeats; explicit heartbeats exist so an idle
/// peer still produces traffic.
///
/// The timeout should be a small multiple of the peer's heartbeat period so
/// one or two beats lost to jitter don't flap the link.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last_seen: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: None,
        }
    }

    /// Record an inbound frame of any kind.
    pub fn note_frame(&mut self) {
        self.last_seen = Some(Instant::now());
    }

    /// Arm the monitor at (re)connect time so a peer that never speaks
    /// still times out relative to the open, not to process start.
    pub fn arm(&mut self) {
        self.last_seen = Some(Instant::now());
    }

    pub fn disarm(&mut self) {
        self.last_seen = None;
    }

    /// True when the peer has been silent past the timeout. Never true
    /// while disarmed (nothing to miss before a connection exists).
    pub fn expired(&self, now: Instant) -> bool {
        match self.last_seen {
            Some(seen) => now.duration_since(seen) > self.timeout,
            None => false,
        }
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }
}

/// Schedules outbound heartbeats: due when nothing has been written for a
/// full period, so command/telemetry traffic naturally suppresses beats.
#[derive(Debug)]
pub struct HeartbeatSchedule {
    period: Duration,
    last_write: Instant,
}

impl HeartbeatSchedule {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_write: Instant::now(),
        }
    }

    /// Record any outbound frame, heartbeat or not.
    pub fn note_write(&mut self) {
        self.last_write = Instant::now();
    }

    pub fn due(&self, now: Instant) -> bool {
        now.duration_since(self.last_write) >= self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_peer_expires() {
        let mut mon = HeartbeatMonitor::new(Duration::from_millis(50));
        mon.arm();
        let now = Instant::now();
        assert!(!mon.expired(now));
        assert!(mon.expired(now + Duration::from_millis(51)));
    }

    #[test]
    fn any_frame_restores_liveness() {
        let mut mon = HeartbeatMonitor::new(Duration::from_millis(50));
        mon.arm();
        let later = Instant::now() + Duration::from_millis(100);
        assert!(mon.expired(later));
        mon.note_frame();
        assert!(!mon.expired(Instant::now()));
    }

    #[test]
    fn disarmed_never_expires() {
        let mon = HeartbeatMonitor::new(Duration::from_millis(1));
        assert!(!mon.expired(Instant::now() + Duration::from_secs(60)));
    }

    #[test]
    fn traffic_defers_heartbeat() {
        let mut hb = HeartbeatSchedule::new(Duration::from_millis(50));
        let now = Instant::now();
        assert!(!hb.due(now));
        assert!(hb.due(now + Duration::from_millis(60)));
        hb.note_write();
        assert!(!hb.due(Instant::now()));
    }
}
