use std::io::{Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::LinkError;

/// Full-duplex byte channel under the link. Serial in production, in-memory
/// in tests; both sides of the contract behave the same.
///
/// `try_clone` hands out a second handle onto the same channel so the reader
/// and writer workers can run on separate threads.
pub trait Channel: Read + Write + Send {
    fn try_clone_channel(&self) -> std::io::Result<Box<dyn Channel>>;
}

impl Channel for Box<dyn SerialPort> {
    fn try_clone_channel(&self) -> std::io::Result<Box<dyn Channel>> {
        let port = SerialPort::try_clone(self.as_ref())
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Box::new(port))
    }
}

/// Factory the reconnect loop calls on every attempt. A single `open` never
/// retries; backoff policy lives in the supervisor, not here.
pub trait ChannelOpener: Send + 'static {
    fn open(&self) -> Result<Box<dyn Channel>, LinkError>;
    fn describe(&self) -> String;
}

/// Opens a serial device at 8N1 with a bounded read timeout. The timeout is
/// what lets a shutdown request unblock the reader thread.
pub struct SerialOpener {
    pub dev: String,
    pub baud: u32,
    pub read_timeout: Duration,
}

impl ChannelOpener for SerialOpener {
    fn open(&self) -> Result<Box<dyn Channel>, LinkError> {
        let port = serialport::new(&self.dev, self.baud)
            .timeout(self.read_timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| LinkError::ChannelUnavailable {
                address: self.dev.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.dev, self.baud)
    }
}
