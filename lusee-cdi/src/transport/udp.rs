//! UDP transport implementation

use super::{ControlPort, Transport};
use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use std::net::{SocketAddr, UdpSocket};

/// UDP transport to the instrument's write and read-request ports
///
/// One socket bound to an ephemeral port on the local interface sends to
/// both destinations. Replies never come back to this socket.
pub struct UdpTransport {
    socket: UdpSocket,
    write_addr: SocketAddr,
    read_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind the sending socket
    pub fn open(network: &NetworkConfig) -> Result<Self> {
        let bind_addr = SocketAddr::new(network.local_ip, 0);
        let socket = UdpSocket::bind(bind_addr)
            .map_err(|e| Error::Other(format!("Failed to bind sender to {}: {}", bind_addr, e)))?;

        let write_addr = network.instrument_write_addr();
        let read_addr = network.instrument_read_addr();
        log::info!(
            "Sender socket {} -> write {}, read {}",
            socket.local_addr()?,
            write_addr,
            read_addr
        );

        Ok(Self {
            socket,
            write_addr,
            read_addr,
        })
    }

    fn destination(&self, port: ControlPort) -> SocketAddr {
        match port {
            ControlPort::Write => self.write_addr,
            ControlPort::ReadRequest => self.read_addr,
        }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, port: ControlPort, frame: &[u8]) -> Result<()> {
        let dest = self.destination(port);
        let sent = self.socket.send_to(frame, dest)?;
        if sent != frame.len() {
            return Err(Error::Other(format!(
                "Short send to {}: {} of {} bytes",
                dest,
                sent,
                frame.len()
            )));
        }
        Ok(())
    }
}
