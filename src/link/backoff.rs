use std::time::Duration;

use rand::Rng;

/// Exponential reconnect backoff: doubles from `initial` up to `cap`, with
/// ±25% jitter so two endpoints rebooting together don't retry in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            current: initial,
        }
    }

    /// Delay to sleep before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.cap);
        jitter(base)
    }

    /// Call after a successful open so the next failure starts cheap again.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Upper bound on the sum of delays for `attempts` attempts, used by
    /// tests to bound reconnect time.
    pub fn worst_case(&self, attempts: u32) -> Duration {
        let mut total = Duration::ZERO;
        let mut d = self.initial;
        for _ in 0..attempts {
            total += jitter_max(d);
            d = (d * 2).min(self.cap);
        }
        total
    }
}

fn jitter(d: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.75..1.25);
    d.mul_f64(factor)
}

fn jitter_max(d: Duration) -> Duration {
    d.mul_f64(1.25)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_to_cap() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let d1 = b.next_delay();
        let d2 = b.next_delay();
        let d3 = b.next_delay();
        let d4 = b.next_delay();
        // Jitter is ±25%, so compare against the widened envelope.
        assert!(d1 >= Duration::from_millis(75) && d1 <= Duration::from_millis(125));
        assert!(d2 >= Duration::from_millis(150) && d2 <= Duration::from_millis(250));
        assert!(d3 >= Duration::from_millis(300) && d3 <= Duration::from_millis(500));
        assert!(d4 <= Duration::from_millis(625), "capped at 500ms +25%");
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(8));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert!(b.next_delay() <= Duration::from_millis(125));
    }
}
