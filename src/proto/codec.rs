use thiserror::Error;

use super::message::Message;

/// Hard cap on one frame. A line that grows past this without a terminator
/// is junk (or a peer speaking the wrong protocol) and gets discarded.
pub const MAX_FRAME_LEN: usize = 4096;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame not valid utf-8")]
    NotUtf8,
    #[error("frame exceeds {MAX_FRAME_LEN} bytes without terminator")]
    Overlong,
    /// The line is not JSON at all — peer debug output sharing the wire,
    /// not a protocol violation. Callers usually skip these silently.
    #[error("line is not a frame")]
    NotAFrame,
}

/// Serialize one message to exactly one newline-terminated frame.
/// Infallible for the enumerated message kinds.
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut out = serde_json::to_vec(msg).unwrap_or_default();
    out.push(b'\n');
    out
}

/// Parse one complete line (terminator already stripped).
pub fn decode_line(line: &str) -> Result<Message, DecodeError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Incremental frame extraction over an unreliable byte stream.
///
/// Owns the partial-frame remainder between reads: frames may arrive split
/// across physical reads or several per read, so callers append whatever
/// bytes the channel produced and pull frames until `next_frame` returns
/// `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume at most one frame from the head of the buffer.
    ///
    /// `Ok(None)` means no complete frame yet; keep appending and retry.
    /// `Err(_)` means one complete frame was consumed but unusable — the
    /// caller counts it and calls again, the stream stays in sync.
    pub fn next_frame(&mut self) -> Result<Option<Message>, DecodeError> {
        let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
            if self.buf.len() > MAX_FRAME_LEN {
                // No terminator in sight; drop the junk and resync on the
                // next newline.
                self.buf.clear();
                return Err(DecodeError::Overlong);
            }
            return Ok(None);
        };

        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        let line = match std::str::from_utf8(&line[..pos]) {
            Ok(s) => s.trim(),
            Err(_) => return Err(DecodeError::NotUtf8),
        };
        if line.is_empty() {
            // Bare CR/LF between frames, not an error.
            return self.next_frame();
        }
        if !looks_like_frame(line) {
            return Err(DecodeError::NotAFrame);
        }
        decode_line(line).map(Some)
    }
}

fn looks_like_frame(line: &str) -> bool {
    line.starts_with('{') && line.ends_with('}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::message::{AckStatus, TelemetrySample};

    fn sample() -> TelemetrySample {
        TelemetrySample {
            cpu_percent: 12.5,
            ram_used_gb: 7.9,
            ram_total_gb: 31.9,
            net_sent_mb: 1024.5,
            net_recv_mb: 8096.0,
            date: "2025-01-01".into(),
            time: "12:00:00".into(),
        }
    }

    #[test]
    fn roundtrip_all_kinds() {
        let msgs = vec![
            Message::command("INIT"),
            Message::heartbeat(),
            Message::system_data(sample()),
            Message::Ack {
                action: "EXIT".into(),
                status: AckStatus::Success,
                message: "bye".into(),
                timestamp: 1700000000.0,
            },
        ];
        for m in msgs {
            let mut fb = FrameBuffer::new();
            fb.push_bytes(&encode(&m));
            assert_eq!(fb.next_frame().unwrap(), Some(m));
            assert!(fb.is_empty());
        }
    }

    #[test]
    fn one_terminator_per_frame() {
        let bytes = encode(&Message::command("TEST"));
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(*bytes.last().unwrap(), b'\n');
    }

    #[test]
    fn partial_frame_byte_at_a_time() {
        let msg = Message::Command {
            action: "INIT".into(),
            timestamp: 1700000000.0,
        };
        let bytes = encode(&msg);
        let mut fb = FrameBuffer::new();
        for &b in &bytes[..bytes.len() - 1] {
            fb.push_bytes(&[b]);
            assert!(fb.next_frame().unwrap().is_none());
        }
        fb.push_bytes(&bytes[bytes.len() - 1..]);
        assert_eq!(fb.next_frame().unwrap(), Some(msg));
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut fb = FrameBuffer::new();
        let mut chunk = encode(&Message::heartbeat());
        chunk.extend_from_slice(&encode(&Message::command("EXIT")));
        fb.push_bytes(&chunk);
        assert!(matches!(
            fb.next_frame().unwrap(),
            Some(Message::Heartbeat { .. })
        ));
        assert!(matches!(
            fb.next_frame().unwrap(),
            Some(Message::Command { .. })
        ));
        assert!(fb.next_frame().unwrap().is_none());
    }

    #[test]
    fn resync_after_corrupt_frame() {
        let msg = Message::Command {
            action: "TEST".into(),
            timestamp: 1700000000.0,
        };
        let mut fb = FrameBuffer::new();
        fb.push_bytes(b"{\"type\":\"command\",\"act\x00GARBAGE\n");
        fb.push_bytes(&encode(&msg));
        // Corrupt frame is consumed and reported once.
        assert!(fb.next_frame().is_err());
        // The following frame decodes cleanly.
        assert_eq!(fb.next_frame().unwrap(), Some(msg));
        assert!(fb.next_frame().unwrap().is_none());
    }

    #[test]
    fn unknown_kind_is_recoverable() {
        let mut fb = FrameBuffer::new();
        fb.push_bytes(b"{\"type\":\"status\",\"state\":\"ready\",\"timestamp\":1.0}\n");
        assert!(fb.next_frame().is_err());
        assert!(fb.is_empty());
    }

    #[test]
    fn missing_field_is_recoverable() {
        let mut fb = FrameBuffer::new();
        fb.push_bytes(b"{\"type\":\"command\",\"timestamp\":1.0}\n");
        assert!(fb.next_frame().is_err());
    }

    #[test]
    fn overlong_line_dropped() {
        let mut fb = FrameBuffer::new();
        fb.push_bytes(&vec![b'x'; MAX_FRAME_LEN + 1]);
        assert!(matches!(fb.next_frame(), Err(DecodeError::Overlong)));
        assert!(fb.is_empty());
        fb.push_bytes(&encode(&Message::heartbeat()));
        assert!(fb.next_frame().unwrap().is_some());
    }

    #[test]
    fn debug_line_is_not_a_frame() {
        let mut fb = FrameBuffer::new();
        fb.push_bytes(b"boot: panel rev 2\n");
        assert!(matches!(fb.next_frame(), Err(DecodeError::NotAFrame)));
        fb.push_bytes(&encode(&Message::heartbeat()));
        assert!(fb.next_frame().unwrap().is_some());
    }

    #[test]
    fn blank_lines_skipped() {
        let mut fb = FrameBuffer::new();
        fb.push_bytes(b"\r\n\n");
        fb.push_bytes(&encode(&Message::heartbeat()));
        assert!(matches!(
            fb.next_frame().unwrap(),
            Some(Message::Heartbeat { .. })
        ));
    }

    #[test]
    fn wire_shape_matches_peer() {
        // Shape the embedded side emits, verbatim.
        let line = "{\"type\":\"command\",\"action\":\"INIT\",\"timestamp\":1700000000.0}";
        let m = decode_line(line).unwrap();
        assert_eq!(
            m,
            Message::Command {
                action: "INIT".into(),
                timestamp: 1700000000.0
            }
        );
    }
}
