use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// Link counters shared across the reader, writer, and supervisor threads.
/// Decode errors are counted here instead of terminating the read loop.
#[derive(Debug)]
pub struct LinkStats {
    pub frames_rx: AtomicU64,
    pub frames_tx: AtomicU64,
    pub bytes_rx: AtomicU64,
    pub decode_errors: AtomicU64,
    pub connect_attempts: AtomicU64,
    last_log: Mutex<Instant>,
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            frames_rx: AtomicU64::new(0),
            frames_tx: AtomicU64::new(0),
            bytes_rx: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            last_log: Mutex::new(Instant::now()),
        }
    }

    pub fn add_bytes_rx(&self, n: usize) {
        self.bytes_rx.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn inc_frames_rx(&self) {
        self.frames_rx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_frames_tx(&self) {
        self.frames_tx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decode_errors(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connect_attempts(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit one summary line at most every `interval_secs`. Called from the
    /// reader loop, so an idle link logs nothing.
    pub fn maybe_log(&self, interval_secs: f64) {
        let mut last = match self.last_log.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if last.elapsed().as_secs_f64() < interval_secs {
            return;
        }
        *last = Instant::now();
        info!(
            rx = self.frames_rx.load(Ordering::Relaxed),
            tx = self.frames_tx.load(Ordering::Relaxed),
            bytes_rx = self.bytes_rx.load(Ordering::Relaxed),
            decode_errors = self.decode_errors.load(Ordering::Relaxed),
            connects = self.connect_attempts.load(Ordering::Relaxed),
            "link stats"
        );
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}
