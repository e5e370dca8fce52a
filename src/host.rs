use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{RecvTimeoutError, bounded};
use tracing::{debug, info, warn};

use crate::cli::HostOpts;
use crate::config::BridgeConfig;
use crate::dispatch::{Dispatcher, builtin_actions};
use crate::link::channel::SerialOpener;
use crate::link::{Link, LinkState, discovery};
use crate::liveness::HeartbeatSchedule;
use crate::proto::message::Message;
use crate::telemetry::{MetricsSource, SystemMetrics, TelemetryPublisher};

/// Stops the service loop; handed to whatever action (EXIT) or signal is
/// allowed to end the process.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Host-side service: dedicated reader off the link, a dispatch worker so a
/// slow action handler can never stall frame draining, and one ticker
/// thread driving telemetry and heartbeats.
pub fn run(opts: HostOpts) -> Result<()> {
    let mut cfg = opts.ser.resolve()?;
    cfg.allow_shutdown = cfg.allow_shutdown || opts.allow_shutdown;

    let dev = match cfg.port.clone() {
        Some(dev) => dev,
        None => discovery::discover(cfg.baud, cfg.read_timeout(), cfg.probe_window())
            .context("serial auto-discovery")?,
    };
    info!(dev, baud = cfg.baud, "starting host service");

    let opener = SerialOpener {
        dev,
        baud: cfg.baud,
        read_timeout: cfg.read_timeout(),
    };
    let link = Link::connect(opener, cfg.link_options());
    let metrics = SystemMetrics::new();
    let allow_shutdown = cfg.allow_shutdown;
    run_service(link, metrics, &cfg, move |dispatcher, stop| {
        builtin_actions(dispatcher, allow_shutdown, move || stop.stop());
    })
}

/// Service loop over an already-built link. The metrics source and the
/// action set are injected so tests can drive the whole service over an
/// in-memory channel with stub handlers.
pub fn run_service(
    link: Link,
    metrics: impl MetricsSource + 'static,
    cfg: &BridgeConfig,
    register: impl FnOnce(&mut Dispatcher, StopHandle),
) -> Result<()> {
    let link = Arc::new(link);
    let running = Arc::new(AtomicBool::new(true));

    let mut dispatcher = Dispatcher::new();
    register(&mut dispatcher, StopHandle(Arc::clone(&running)));
    let dispatcher = Arc::new(dispatcher);

    // Dispatch runs off the read path; the queue is small because commands
    // are rare (one per physical press) and stale ones are worthless.
    let (cmd_tx, cmd_rx) = bounded::<String>(16);
    let dispatch_worker = {
        let link = Arc::clone(&link);
        let dispatcher = Arc::clone(&dispatcher);
        let running = Arc::clone(&running);
        std::thread::Builder::new()
            .name("dispatch".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let action = match cmd_rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(a) => a,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    let result = dispatcher.dispatch(&action);
                    // Exactly one ack per dispatch; losing it to a dead
                    // link is logged, not retried.
                    if let Err(e) = link.send(&Message::ack(&result)) {
                        warn!(action, error = %e, "ack not sent");
                    }
                }
            })
            .context("spawning dispatch worker")?
    };

    let ticker = {
        let link = Arc::clone(&link);
        let running = Arc::clone(&running);
        let mut publisher = TelemetryPublisher::new(cfg.telemetry_period(), cfg.suppress_unchanged);
        let mut heartbeat = HeartbeatSchedule::new(cfg.heartbeat_period());
        let mut metrics = metrics;
        std::thread::Builder::new()
            .name("ticker".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(250));
                    let now = Instant::now();
                    if publisher.tick(now, &mut metrics, link.as_ref()) {
                        heartbeat.note_write();
                    }
                    // Beats fill the gaps so the peer sees traffic even
                    // when nothing else is flowing.
                    if heartbeat.due(now)
                        && link.state() == LinkState::Connected
                        && link.send(&Message::heartbeat()).is_ok()
                    {
                        heartbeat.note_write();
                    }
                }
            })
            .context("spawning ticker")?
    };

    // Reader: the sole consumer of inbound frames.
    let inbound = link.receiver();
    while running.load(Ordering::SeqCst) {
        match inbound.recv_timeout(Duration::from_millis(200)) {
            Ok(Message::Command { action, .. }) => {
                if cmd_tx.try_send(action.clone()).is_err() {
                    warn!(action, "dispatch queue full, command dropped");
                }
            }
            Ok(Message::Heartbeat { .. }) => {} // liveness noted by the link
            Ok(other) => debug!(?other, "unexpected inbound frame"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("host service stopping");
    running.store(false, Ordering::SeqCst);
    drop(cmd_tx);
    let _ = dispatch_worker.join();
    let _ = ticker.join();
    Ok(())
}
