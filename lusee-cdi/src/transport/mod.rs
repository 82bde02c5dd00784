//! Transport layer for outbound command frames

use crate::error::Result;

#[cfg(test)]
mod mock;
mod udp;

#[cfg(test)]
pub use mock::MockTransport;
pub use udp::UdpTransport;

/// Instrument control ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPort {
    /// Register writes
    Write,
    /// Register read requests (reply comes back on the register-response port)
    ReadRequest,
}

/// Transport trait for sending command frames to the instrument
pub trait Transport: Send {
    /// Send one complete frame to the given control port
    fn send(&mut self, port: ControlPort, frame: &[u8]) -> Result<()>;
}
