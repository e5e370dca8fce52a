use std::io::BufRead;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, bounded};
use tracing::{debug, info, warn};

use crate::cli::DeviceOpts;
use crate::config::BridgeConfig;
use crate::link::backoff::Backoff;
use crate::link::channel::{Channel, ChannelOpener, SerialOpener};
use crate::link::{LinkError, LinkState, recoverable_read_error};
use crate::liveness::{HeartbeatMonitor, HeartbeatSchedule};
use crate::proto::codec::{self, FrameBuffer};
use crate::proto::message::{AckStatus, Message, TelemetrySample};

/// Where decoded payloads go on the panel side. The pixel rendering itself
/// is a peripheral concern; the endpoint only forwards values.
pub trait Display {
    fn render_telemetry(&mut self, sample: &TelemetrySample);
    fn render_ack(&mut self, action: &str, status: AckStatus, message: &str);
    fn render_link(&mut self, connected: bool);
}

/// Logs what a real panel would draw.
pub struct ConsoleDisplay;

impl Display for ConsoleDisplay {
    fn render_telemetry(&mut self, s: &TelemetrySample) {
        info!(
            cpu = s.cpu_percent,
            ram = format!("{:.1}/{:.1}G", s.ram_used_gb, s.ram_total_gb),
            net = format!("{:.1}/{:.1}M", s.net_sent_mb, s.net_recv_mb),
            clock = format!("{} {}", s.date, s.time),
            "system data"
        );
    }

    fn render_ack(&mut self, action: &str, status: AckStatus, message: &str) {
        info!(action, ?status, message, "command result");
    }

    fn render_link(&mut self, connected: bool) {
        info!(connected, "host link");
    }
}

/// Panel-side endpoint: the same link/codec contract as the host, driven as
/// a single-threaded cooperative loop. One `poll_step` never blocks longer
/// than the channel read timeout, so a stalled peer cannot freeze local
/// input handling.
pub struct DeviceEndpoint<D: Display> {
    opener: Box<dyn ChannelOpener>,
    channel: Option<Box<dyn Channel>>,
    frames: FrameBuffer,
    monitor: HeartbeatMonitor,
    heartbeat: HeartbeatSchedule,
    backoff: Backoff,
    next_attempt: Instant,
    peer_up: bool,
    display: D,
    decode_errors: u64,
}

impl<D: Display> DeviceEndpoint<D> {
    pub fn new(opener: Box<dyn ChannelOpener>, cfg: &BridgeConfig, display: D) -> Self {
        Self {
            opener,
            channel: None,
            frames: FrameBuffer::new(),
            monitor: HeartbeatMonitor::new(cfg.liveness_timeout()),
            heartbeat: HeartbeatSchedule::new(cfg.heartbeat_period()),
            backoff: Backoff::new(
                Duration::from_millis(cfg.initial_backoff_ms),
                Duration::from_millis(cfg.max_backoff_ms),
            ),
            next_attempt: Instant::now(),
            peer_up: false,
            display,
            decode_errors: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        match (&self.channel, self.peer_up) {
            (Some(_), true) => LinkState::Connected,
            _ => LinkState::Disconnected,
        }
    }

    /// One cooperative iteration: reconnect if due, drain available bytes,
    /// route decoded frames, update liveness, emit a heartbeat when idle.
    pub fn poll_step(&mut self, now: Instant) {
        if self.channel.is_none() {
            if now < self.next_attempt {
                return;
            }
            match self.opener.open() {
                Ok(ch) => {
                    info!(channel = self.opener.describe(), "device channel open");
                    self.channel = Some(ch);
                    self.frames = FrameBuffer::new();
                    self.monitor.arm();
                    self.backoff.reset();
                }
                Err(e) => {
                    debug!(error = %e, "device open failed");
                    self.next_attempt = now + self.backoff.next_delay();
                    return;
                }
            }
        }

        self.drain_inbound();

        if self.peer_up && self.monitor.expired(Instant::now()) {
            // Peer silent past the timeout: the handle may still be fine,
            // the peer is gone. Keep the channel, flip the indicator.
            self.peer_up = false;
            self.display.render_link(false);
        }

        if self.channel.is_some() && self.heartbeat.due(Instant::now()) {
            if let Err(e) = self.write_frame(&Message::heartbeat()) {
                debug!(error = %e, "heartbeat not sent");
            }
        }
    }

    /// Emit one command frame, as a button press would.
    pub fn send_command(&mut self, action: &str) -> Result<(), LinkError> {
        self.write_frame(&Message::command(action))
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    fn drain_inbound(&mut self) {
        let mut buf = [0u8; 512];
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        match channel.read(&mut buf) {
            Ok(0) => self.drop_channel("channel eof"),
            Ok(n) => {
                self.frames.push_bytes(&buf[..n]);
                loop {
                    match self.frames.next_frame() {
                        Ok(Some(msg)) => self.handle_frame(msg),
                        Ok(None) => break,
                        Err(codec::DecodeError::NotAFrame) => {
                            debug!("host debug line skipped");
                        }
                        Err(e) => {
                            self.decode_errors += 1;
                            debug!(error = %e, "dropped undecodable frame");
                        }
                    }
                }
            }
            Err(e) if recoverable_read_error(&e) => {}
            Err(e) => {
                warn!(error = %e, "device read failed");
                self.drop_channel("read error");
            }
        }
    }

    fn handle_frame(&mut self, msg: Message) {
        self.monitor.note_frame();
        if !self.peer_up {
            self.peer_up = true;
            self.display.render_link(true);
        }
        match msg {
            Message::SystemData { sample, .. } => self.display.render_telemetry(&sample),
            Message::Ack {
                action,
                status,
                message,
                ..
            } => self.display.render_ack(&action, status, &message),
            Message::Heartbeat { .. } => {}
            Message::Command { action, .. } => {
                debug!(action, "command frame on device side, ignoring")
            }
        }
    }

    fn write_frame(&mut self, msg: &Message) -> Result<(), LinkError> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(LinkError::LinkDown);
        };
        let frame = codec::encode(msg);
        match channel.write_all(&frame).and_then(|()| channel.flush()) {
            Ok(()) => {
                self.heartbeat.note_write();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "device write failed");
                self.drop_channel("write error");
                Err(LinkError::LinkDown)
            }
        }
    }

    fn drop_channel(&mut self, reason: &str) {
        debug!(reason, "device channel closed");
        self.channel = None;
        self.monitor.disarm();
        self.next_attempt = Instant::now() + self.backoff.next_delay();
        if self.peer_up {
            self.peer_up = false;
            self.display.render_link(false);
        }
    }
}

/// Stand-in for touch input: lines typed on stdin become command frames.
fn stdin_commands() -> Receiver<String> {
    let (tx, rx) = bounded::<String>(8);
    let _ = std::thread::Builder::new()
        .name("device-input".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim().to_string();
                if !line.is_empty() && tx.send(line).is_err() {
                    break;
                }
            }
        });
    rx
}

pub fn run(opts: DeviceOpts) -> Result<()> {
    let cfg = opts.ser.resolve()?;
    let Some(dev) = cfg.port.clone() else {
        bail!("device mode needs an explicit --dev (no auto-discovery on this side)");
    };
    info!(dev, baud = cfg.baud, "starting device endpoint");

    let opener = SerialOpener {
        dev,
        baud: cfg.baud,
        read_timeout: cfg.read_timeout(),
    };
    let mut endpoint = DeviceEndpoint::new(Box::new(opener), &cfg, ConsoleDisplay);
    let input = stdin_commands();

    loop {
        endpoint.poll_step(Instant::now());
        while let Ok(action) = input.try_recv() {
            if action.eq_ignore_ascii_case("quit") {
                info!("device endpoint stopping");
                return Ok(());
            }
            if let Err(e) = endpoint.send_command(&action) {
                warn!(action, error = %e, "command not sent");
            }
        }
        // Yield between iterations; the read timeout above bounds latency.
        std::thread::sleep(Duration::from_millis(10));
    }
}
