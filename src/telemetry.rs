use std::time::{Duration, Instant};

use sysinfo::{Networks, System};
use tracing::{debug, warn};

use crate::link::{Link, LinkError, LinkState};
use crate::proto::message::{Message, TelemetrySample};

/// Where telemetry values come from. The publisher only carries samples;
/// what a sample contains is this collaborator's business.
pub trait MetricsSource: Send {
    fn sample(&mut self) -> TelemetrySample;
}

/// Something telemetry frames can be pushed into. `Link` is the production
/// sink; tests count writes through a fake.
pub trait FrameSink {
    fn state(&self) -> LinkState;
    fn send(&self, msg: &Message) -> Result<(), LinkError>;
}

impl FrameSink for Link {
    fn state(&self) -> LinkState {
        Link::state(self)
    }

    fn send(&self, msg: &Message) -> Result<(), LinkError> {
        Link::send(self, msg)
    }
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Samples host CPU, RAM, and cumulative network counters. Net counters are
/// since-boot totals; consumers treat a decrease as a counter reset.
pub struct SystemMetrics {
    sys: System,
}

impl SystemMetrics {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SystemMetrics {
    fn sample(&mut self) -> TelemetrySample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let networks = Networks::new_with_refreshed_list();
        let (sent, recv) = networks
            .iter()
            .fold((0u64, 0u64), |(s, r), (_, data)| {
                (s + data.total_transmitted(), r + data.total_received())
            });

        let now = chrono::Local::now();
        TelemetrySample {
            cpu_percent: round1(f64::from(self.sys.global_cpu_usage()).clamp(0.0, 100.0)),
            ram_used_gb: round1(self.sys.used_memory() as f64 / GIB),
            ram_total_gb: round1(self.sys.total_memory() as f64 / GIB),
            net_sent_mb: round1(sent as f64 / MIB),
            net_recv_mb: round1(recv as f64 / MIB),
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Emits one `system_data` frame per period while the link is connected.
///
/// Freshest-wins: sampling continues while disconnected so the next emitted
/// value is current, but nothing is queued — a missed tick is just missed.
/// Send failures (`LinkDown`, `QueueFull`) wait for the next tick.
pub struct TelemetryPublisher {
    period: Duration,
    suppress_unchanged: bool,
    last_tick: Option<Instant>,
    last_sent: Option<TelemetrySample>,
}

impl TelemetryPublisher {
    pub fn new(period: Duration, suppress_unchanged: bool) -> Self {
        Self {
            period,
            suppress_unchanged,
            last_tick: None,
            last_sent: None,
        }
    }

    /// Drive one tick boundary check. Returns true when a frame was handed
    /// to the sink.
    pub fn tick(
        &mut self,
        now: Instant,
        source: &mut dyn MetricsSource,
        sink: &dyn FrameSink,
    ) -> bool {
        match self.last_tick {
            Some(last) if now.duration_since(last) < self.period => return false,
            _ => self.last_tick = Some(now),
        }

        let sample = source.sample();

        if sink.state() != LinkState::Connected {
            debug!("telemetry suppressed while disconnected");
            return false;
        }
        if self.suppress_unchanged && self.last_sent.as_ref() == Some(&sample) {
            return false;
        }

        match sink.send(&Message::system_data(sample.clone())) {
            Ok(()) => {
                self.last_sent = Some(sample);
                true
            }
            Err(e) => {
                warn!(error = %e, "telemetry frame not sent, awaiting next tick");
                false
            }
        }
    }
}
