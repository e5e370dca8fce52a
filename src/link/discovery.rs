use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::LinkError;
use super::channel::{ChannelOpener, SerialOpener};
use crate::proto::codec::FrameBuffer;

/// Probe candidate serial ports for a peer speaking the protocol. A port is
/// adopted as soon as it yields any decodable frame within the probe
/// window; the peer beats at least every few seconds, so a live port speaks
/// quickly.
pub fn discover(
    baud: u32,
    read_timeout: Duration,
    probe_window: Duration,
) -> Result<String, LinkError> {
    let ports = serialport::available_ports().map_err(|e| {
        debug!(error = %e, "port enumeration failed");
        LinkError::NoDeviceFound { probed: 0 }
    })?;

    let candidates: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
    info!(count = candidates.len(), "probing serial ports");

    for dev in &candidates {
        let opener = SerialOpener {
            dev: dev.clone(),
            baud,
            read_timeout,
        };
        match probe_one(&opener, probe_window) {
            Ok(true) => {
                info!(dev, "device found");
                return Ok(dev.clone());
            }
            Ok(false) => debug!(dev, "no protocol traffic"),
            Err(e) => debug!(dev, error = %e, "probe skipped"),
        }
    }

    Err(LinkError::NoDeviceFound {
        probed: candidates.len(),
    })
}

/// One open + bounded listen. True once a complete frame decodes.
fn probe_one(opener: &SerialOpener, window: Duration) -> Result<bool, LinkError> {
    let mut channel = opener.open()?;
    let mut frames = FrameBuffer::new();
    let mut buf = [0u8; 512];
    let deadline = Instant::now() + window;

    while Instant::now() < deadline {
        match channel.read(&mut buf) {
            Ok(0) => return Ok(false),
            Ok(n) => {
                frames.push_bytes(&buf[..n]);
                loop {
                    match frames.next_frame() {
                        Ok(Some(_)) => return Ok(true),
                        Ok(None) => break,
                        // Mid-stream garbage is expected when we attach to
                        // a half-written line; keep listening.
                        Err(_) => {}
                    }
                }
            }
            Err(e) if super::recoverable_read_error(&e) => {}
            Err(_) => return Ok(false),
        }
    }
    Ok(false)
}
