use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::liveness::HeartbeatMonitor;
use crate::proto::codec::{self, FrameBuffer};
use crate::proto::message::Message;
use crate::stats::LinkStats;

pub mod backoff;
pub mod channel;
pub mod discovery;

use backoff::Backoff;
use channel::{Channel, ChannelOpener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("channel unavailable at {address}: {reason}")]
    ChannelUnavailable { address: String, reason: String },
    #[error("link is down")]
    LinkDown,
    #[error("outgoing queue is full")]
    QueueFull,
    #[error("no device found after probing {probed} candidate port(s)")]
    NoDeviceFound { probed: usize },
}

#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub liveness_timeout: Duration,
    pub read_timeout: Duration,
    pub queue_depth: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            liveness_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_millis(100),
            queue_depth: 32,
        }
    }
}

/// State shared between the caller, the supervisor, and the per-connection
/// worker threads.
struct Shared {
    state: Mutex<LinkState>,
    generation: AtomicU64,
    stop: AtomicBool,
    subscribers: Mutex<Vec<Sender<LinkState>>>,
    monitor: Mutex<HeartbeatMonitor>,
    stats: Arc<LinkStats>,
}

impl Shared {
    fn set_state(&self, next: LinkState) {
        if !self.swap_state(next) {
            return;
        }
        let mut subs = lock(&self.subscribers);
        subs.retain(|tx| tx.send(next).is_ok());
    }

    /// State change visible to polling but not broadcast. Used around open
    /// attempts: a failed attempt reads as remaining `Disconnected`, never
    /// as an observable `Connecting -> Disconnected` event.
    fn set_state_quiet(&self, next: LinkState) {
        self.swap_state(next);
    }

    fn swap_state(&self, next: LinkState) -> bool {
        let mut state = lock(&self.state);
        if *state == next {
            return false;
        }
        *state = next;
        true
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// A worker is live while its generation is still the active one.
    /// In-flight work captured under a stale generation must be discarded,
    /// never applied to a freshly opened handle.
    fn is_current(&self, generation: u64) -> bool {
        !self.stopped() && self.generation.load(Ordering::SeqCst) == generation
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Owns the physical channel and its whole lifecycle: open, reconnect with
/// backoff, framed reads on a dedicated thread, queued atomic writes, and a
/// liveness-derived `LinkState`.
///
/// `send` never blocks and never buffers across a reconnect; while the link
/// is down it fails fast with `LinkDown` and the caller decides whether the
/// frame was droppable (telemetry) or worth holding (commands).
pub struct Link {
    shared: Arc<Shared>,
    outbound_tx: Sender<Vec<u8>>,
    outbound_rx: Receiver<Vec<u8>>,
    inbound_rx: Receiver<Message>,
    supervisor: Option<JoinHandle<()>>,
}

impl Link {
    /// Start the link against `opener`. Connection happens on the
    /// supervisor thread; the returned handle is usable immediately and
    /// reports `Disconnected` until the first open succeeds.
    pub fn connect(opener: impl ChannelOpener, opts: LinkOptions) -> Self {
        let stats = Arc::new(LinkStats::new());
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState::Disconnected),
            generation: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            monitor: Mutex::new(HeartbeatMonitor::new(opts.liveness_timeout)),
            stats,
        });
        let (outbound_tx, outbound_rx) = bounded::<Vec<u8>>(opts.queue_depth);
        let (inbound_tx, inbound_rx) = bounded::<Message>(128);

        let supervisor = {
            let shared = Arc::clone(&shared);
            let outbound_rx = outbound_rx.clone();
            std::thread::Builder::new()
                .name("link-supervisor".into())
                .spawn(move || supervise(shared, opener, opts, outbound_rx, inbound_tx))
                .ok()
        };

        Self {
            shared,
            outbound_tx,
            outbound_rx,
            inbound_rx,
            supervisor,
        }
    }

    pub fn state(&self) -> LinkState {
        *lock(&self.shared.state)
    }

    /// Observe state transitions. The current state is delivered first so a
    /// late subscriber doesn't wait for the next flap.
    pub fn subscribe(&self) -> Receiver<LinkState> {
        let (tx, rx) = unbounded();
        let current = self.state();
        let _ = tx.send(current);
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Enqueue one frame for transmission. Non-blocking: fails fast with
    /// `LinkDown` while disconnected and `QueueFull` under backpressure.
    pub fn send(&self, msg: &Message) -> Result<(), LinkError> {
        if self.state() != LinkState::Connected {
            return Err(LinkError::LinkDown);
        }
        let frame = codec::encode(msg);
        match self.outbound_tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(crossbeam_channel::TrySendError::Full(_)) => Err(LinkError::QueueFull),
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => Err(LinkError::LinkDown),
        }
    }

    /// The sole inbound path: decoded frames as they arrive. The stream
    /// ends only when the link is closed.
    pub fn receiver(&self) -> Receiver<Message> {
        self.inbound_rx.clone()
    }

    pub fn stats(&self) -> Arc<LinkStats> {
        Arc::clone(&self.shared.stats)
    }

    /// Stop the link and release the channel. Idempotent; the reader thread
    /// unblocks within one read timeout.
    pub fn close(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.set_state(LinkState::Disconnected);
        while self.outbound_rx.try_recv().is_ok() {}
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

fn supervise(
    shared: Arc<Shared>,
    opener: impl ChannelOpener,
    opts: LinkOptions,
    outbound_rx: Receiver<Vec<u8>>,
    inbound_tx: Sender<Message>,
) {
    let mut backoff = Backoff::new(opts.initial_backoff, opts.max_backoff);

    while !shared.stopped() {
        shared.set_state_quiet(LinkState::Connecting);
        shared.stats.inc_connect_attempts();
        let channel = match opener.open() {
            Ok(ch) => ch,
            Err(e) => {
                // A failed attempt settles back to Disconnected; retry
                // policy lives here, never inside open itself.
                shared.set_state_quiet(LinkState::Disconnected);
                let delay = backoff.next_delay();
                debug!(channel = %opener.describe(), error = %e, ?delay, "open failed");
                sleep_unless_stopped(&shared, delay);
                continue;
            }
        };
        let reader_half = match channel.try_clone_channel() {
            Ok(ch) => ch,
            Err(e) => {
                shared.set_state_quiet(LinkState::Disconnected);
                warn!(error = %e, "could not clone channel handle");
                sleep_unless_stopped(&shared, backoff.next_delay());
                continue;
            }
        };

        backoff.reset();
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&shared.monitor).arm();
        shared.set_state(LinkState::Connected);
        info!(channel = %opener.describe(), generation, "link up");

        let (fault_tx, fault_rx) = bounded::<&'static str>(2);
        let reader = spawn_worker("link-reader", {
            let shared = Arc::clone(&shared);
            let inbound = inbound_tx.clone();
            let fault = fault_tx.clone();
            move || reader_loop(generation, reader_half, shared, inbound, fault)
        });
        let writer = spawn_worker("link-writer", {
            let shared = Arc::clone(&shared);
            let outbound = outbound_rx.clone();
            move || writer_loop(generation, channel, shared, outbound, fault_tx)
        });

        let reason = wait_for_fault(&shared, &fault_rx);
        warn!(generation, reason, "link down");

        // Retire the generation first so both workers exit, then drop any
        // queued frames: the link does not buffer across a reconnect.
        shared.generation.fetch_add(1, Ordering::SeqCst);
        shared.set_state(LinkState::Disconnected);
        lock(&shared.monitor).disarm();
        while outbound_rx.try_recv().is_ok() {}
        join_worker(reader);
        join_worker(writer);
    }
    shared.set_state(LinkState::Disconnected);
}

/// Block until the connection faults, the peer goes silent past the
/// liveness timeout, or the link is closed. Returns the reason.
fn wait_for_fault(shared: &Arc<Shared>, fault_rx: &Receiver<&'static str>) -> &'static str {
    loop {
        if shared.stopped() {
            return "closed";
        }
        match fault_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(reason) => return reason,
            Err(RecvTimeoutError::Disconnected) => return "workers gone",
            Err(RecvTimeoutError::Timeout) => {
                // Peer absence is distinct from channel-level failure: the
                // handle can be healthy while nothing is on the other end.
                if lock(&shared.monitor).expired(Instant::now()) {
                    return "peer silent";
                }
            }
        }
    }
}

fn reader_loop(
    generation: u64,
    mut channel: Box<dyn Channel>,
    shared: Arc<Shared>,
    inbound: Sender<Message>,
    fault: Sender<&'static str>,
) {
    let mut frames = FrameBuffer::new();
    let mut buf = [0u8; 512];

    while shared.is_current(generation) {
        match channel.read(&mut buf) {
            Ok(0) => {
                let _ = fault.try_send("channel eof");
                return;
            }
            Ok(n) => {
                shared.stats.add_bytes_rx(n);
                frames.push_bytes(&buf[..n]);
                loop {
                    match frames.next_frame() {
                        Ok(Some(msg)) => {
                            shared.stats.inc_frames_rx();
                            lock(&shared.monitor).note_frame();
                            // Reader must never block; if the consumer lags
                            // the oldest unread frames lose to fresher ones.
                            if inbound.try_send(msg).is_err() {
                                debug!("inbound queue full, frame dropped");
                            }
                        }
                        Ok(None) => break,
                        Err(codec::DecodeError::NotAFrame) => {
                            debug!("peer debug line skipped");
                        }
                        Err(e) => {
                            shared.stats.inc_decode_errors();
                            debug!(error = %e, "dropped undecodable frame");
                        }
                    }
                }
                shared.stats.maybe_log(30.0);
            }
            Err(e) if recoverable_read_error(&e) => continue,
            Err(e) => {
                error!(error = %e, "read failed");
                let _ = fault.try_send("read error");
                return;
            }
        }
    }
}

fn writer_loop(
    generation: u64,
    mut channel: Box<dyn Channel>,
    shared: Arc<Shared>,
    outbound: Receiver<Vec<u8>>,
    fault: Sender<&'static str>,
) {
    while shared.is_current(generation) {
        let frame = match outbound.recv_timeout(Duration::from_millis(100)) {
            Ok(f) => f,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };
        // A frame dequeued just as the link flapped must not be written to
        // a handle from a newer generation.
        if !shared.is_current(generation) {
            return;
        }
        // Whole-frame write: concurrent senders cannot interleave bytes on
        // the wire because this thread is the only writer.
        if let Err(e) = channel.write_all(&frame).and_then(|()| channel.flush()) {
            error!(error = %e, "write failed");
            let _ = fault.try_send("write error");
            return;
        }
        shared.stats.inc_frames_tx();
    }
}

pub(crate) fn recoverable_read_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

fn sleep_unless_stopped(shared: &Arc<Shared>, total: Duration) {
    let deadline = Instant::now() + total;
    while !shared.stopped() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

fn spawn_worker<F>(name: &str, f: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new().name(name.into()).spawn(f).ok()
}

fn join_worker(handle: Option<JoinHandle<()>>) {
    if let Some(h) = handle {
        let _ = h.join();
    }
}
