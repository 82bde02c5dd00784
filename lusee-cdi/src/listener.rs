//! Per-port UDP listener
//!
//! # Architecture
//!
//! ```text
//! mio::poll() ─┬─ SOCKET ─► recv_from() until WouldBlock ─► Inbound::Datagram ─► worker
//!              └─ WAKER  ─► shutdown flag set? ─► exit, Inbound::Stop ─► worker
//! ```
//!
//! The poll blocks without a timeout; `Client::shutdown` sets the shared
//! flag and wakes every listener through its [`Waker`]. The socket is
//! edge-triggered, so each readiness event drains it completely.

use crate::core::types::{Inbound, PortKind, RawDatagram};
use crate::error::{Error, Result};
use crossbeam_channel::Sender;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const SOCKET_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// Owns one bound socket and feeds one worker
pub struct Listener {
    port: PortKind,
    socket: UdpSocket,
    poll: Poll,
    output: Sender<Inbound>,
    shutdown: Arc<AtomicBool>,
    buffer: Vec<u8>,
    received: u64,
}

impl Listener {
    /// Bind the socket and prepare the poll; returns the waker used to stop it
    pub fn bind(
        port: PortKind,
        addr: SocketAddr,
        buffer_size: usize,
        output: Sender<Inbound>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(Self, Arc<Waker>)> {
        let std_socket = std::net::UdpSocket::bind(addr).map_err(|e| {
            Error::Other(format!("Failed to bind {} listener to {}: {}", port, addr, e))
        })?;
        std_socket.set_nonblocking(true)?;
        let mut socket = UdpSocket::from_std(std_socket);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        log::info!("{} listener bound to {}", port, socket.local_addr()?);

        Ok((
            Self {
                port,
                socket,
                poll,
                output,
                shutdown,
                buffer: vec![0u8; buffer_size],
                received: 0,
            },
            waker,
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Listener loop - blocks until shutdown, then sends the stop sentinel
    pub fn run(mut self) {
        log::info!("{} listener started", self.port);
        let mut events = Events::with_capacity(4);

        'outer: while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                if !self.shutdown.load(Ordering::Relaxed) {
                    log::error!("{} listener poll failed: {}", self.port, e);
                }
                break;
            }

            for event in events.iter() {
                match event.token() {
                    SOCKET_TOKEN => {
                        if !self.drain_socket() {
                            break 'outer;
                        }
                    }
                    WAKE_TOKEN => {
                        if self.shutdown.load(Ordering::Relaxed) {
                            break 'outer;
                        }
                    }
                    _ => {}
                }
            }
        }

        // Worker may already be gone
        let _ = self.output.send(Inbound::Stop);
        log::info!(
            "{} listener thread exiting ({} datagrams received)",
            self.port,
            self.received
        );
    }

    /// Receive until the socket would block; false means stop listening
    fn drain_socket(&mut self) -> bool {
        loop {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((len, source)) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        return false;
                    }
                    self.received += 1;
                    let datagram = RawDatagram {
                        port: self.port,
                        source,
                        bytes: self.buffer[..len].to_vec(),
                    };
                    if self.output.send(Inbound::Datagram(datagram)).is_err() {
                        log::warn!("{} worker channel closed", self.port);
                        return false;
                    }
                }
                Err(e) => {
                    let shutting_down = self.shutdown.load(Ordering::Relaxed);
                    match recv_error_action(e.kind(), shutting_down) {
                        RecvErrorAction::Retry => {
                            if e.kind() != io::ErrorKind::Interrupted {
                                log::warn!("{} listener receive error: {}", self.port, e);
                            }
                        }
                        RecvErrorAction::Drained => return true,
                        RecvErrorAction::Stop => return false,
                    }
                }
            }
        }
    }
}

/// What the drain loop does after a failed receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvErrorAction {
    /// Keep reading; more datagrams may be queued behind the error
    Retry,
    /// Socket is empty until the next readiness event
    Drained,
    /// Leave the listener loop
    Stop,
}

fn recv_error_action(kind: io::ErrorKind, shutting_down: bool) -> RecvErrorAction {
    match kind {
        io::ErrorKind::WouldBlock => RecvErrorAction::Drained,
        _ if shutting_down => RecvErrorAction::Stop,
        // ICMP port-unreachable and friends surface here; the socket is edge-triggered
        _ => RecvErrorAction::Retry,
    }
}
