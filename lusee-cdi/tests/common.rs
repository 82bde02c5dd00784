//! Test utilities for LuSEE CDI integration tests.
//!
//! Provides a fake instrument on loopback UDP that speaks the CDI command
//! protocol: staged words are committed on latch = 1, latch status reports
//! ready once the staged word is committed, and address-reads load the
//! readback register.

#![allow(dead_code)]

use lusee_cdi::config::{Config, NetworkConfig, TimingConfig};
use lusee_cdi::protocol::constants::*;
use lusee_cdi::protocol::{CdiHeader, parse_command};
use lusee_cdi::{Client, PortKind, RegisterReply};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Fake instrument register file
#[derive(Debug, Default)]
pub struct InstrumentState {
    /// CDI registers as last written
    pub cdi: HashMap<u16, u32>,
    /// Spectrometer registers as committed through the staged-word protocol
    pub registers: HashMap<u16, u32>,
    /// Every committed spectrometer write, in order
    pub history: Vec<(u16, u32)>,
    high: u32,
    low: u32,
    readback: u32,
    committed: bool,
    /// When false the latch never reports ready
    pub ack_latch: bool,
    reply_to: Option<SocketAddr>,
}

impl InstrumentState {
    fn apply_write(&mut self, register: u16, value: u32) {
        self.cdi.insert(register, value);
        match register {
            WRITE_REGISTER => self.committed = false,
            LATCH_REGISTER if value == 1 && self.ack_latch => {
                let staged = self.cdi.get(&WRITE_REGISTER).copied().unwrap_or(0);
                self.commit(staged);
                self.committed = true;
            }
            _ => {}
        }
    }

    fn commit(&mut self, staged: u32) {
        let payload = staged & 0xFFFF;
        match staged & OPCODE_MASK {
            DATA_HIGH_PREFIX => self.high = payload,
            DATA_LOW_PREFIX => self.low = payload,
            ADDRESS_WRITE_PREFIX => {
                let value = (self.high << 16) | self.low;
                self.registers.insert(payload as u16, value);
                self.history.push((payload as u16, value));
            }
            ADDRESS_READ_PREFIX => {
                self.readback = self.registers.get(&(payload as u16)).copied().unwrap_or(0);
            }
            _ => {}
        }
    }

    fn read(&self, register: u16) -> u32 {
        match register {
            LATCH_REGISTER => {
                let ready = if self.committed { LATCH_READY_BIT } else { 0 };
                ready | self.cdi.get(&LATCH_REGISTER).copied().unwrap_or(0)
            }
            READBACK_REGISTER => self.readback,
            _ => self.cdi.get(&register).copied().unwrap_or(0),
        }
    }
}

/// Fake instrument bound to loopback
pub struct FakeInstrument {
    pub state: Arc<Mutex<InstrumentState>>,
    write_addr: SocketAddr,
    read_addr: SocketAddr,
    telemetry: UdpSocket,
    data_to: Mutex<Option<SocketAddr>>,
    housekeeping_to: Mutex<Option<SocketAddr>>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl FakeInstrument {
    pub fn start() -> Self {
        let state = Arc::new(Mutex::new(InstrumentState {
            ack_latch: true,
            ..Default::default()
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let write_socket = bind_loopback();
        let read_socket = bind_loopback();
        let write_addr = write_socket.local_addr().unwrap();
        let read_addr = read_socket.local_addr().unwrap();

        let mut threads = Vec::new();
        {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            threads.push(thread::spawn(move || {
                serve(&write_socket, &stop, |_, (register, value)| {
                    state.lock().apply_write(register, value);
                })
            }));
        }
        {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            threads.push(thread::spawn(move || {
                serve(&read_socket, &stop, |socket, (register, _)| {
                    let (value, reply_to) = {
                        let state = state.lock();
                        (state.read(register), state.reply_to)
                    };
                    if let Some(addr) = reply_to {
                        let reply = RegisterReply { register, value };
                        let _ = socket.send_to(&reply.to_bytes(), addr);
                    }
                })
            }));
        }

        Self {
            state,
            write_addr,
            read_addr,
            telemetry: bind_loopback(),
            data_to: Mutex::new(None),
            housekeeping_to: Mutex::new(None),
            stop,
            threads,
        }
    }

    /// Client configuration pointing at this instrument, with short timings
    pub fn config(&self) -> Config {
        Config {
            network: NetworkConfig::loopback(self.write_addr.port(), self.read_addr.port()),
            timing: TimingConfig {
                settle_ms: 2,
                latch_attempts: 10,
                latch_reply_timeout_ms: 100,
                cdi_reply_timeout_ms: 200,
                read_timeout_ms: 500,
                read_attempts: 3,
                reset_hold_ms: 5,
                reset_recover_ms: 5,
            },
            ..Default::default()
        }
    }

    /// Learn where the client listens
    pub fn attach(&self, client: &Client) {
        self.state.lock().reply_to = client.listener_addr(PortKind::RegisterResponse);
        *self.data_to.lock() = client.listener_addr(PortKind::HighSpeedData);
        *self.housekeeping_to.lock() = client.listener_addr(PortKind::Housekeeping);
    }

    pub fn set_latch_ack(&self, ack: bool) {
        self.state.lock().ack_latch = ack;
    }

    /// Stop answering read requests
    pub fn mute_replies(&self) {
        self.state.lock().reply_to = None;
    }

    pub fn register(&self, register: u16) -> Option<u32> {
        self.state.lock().registers.get(&register).copied()
    }

    pub fn cdi_register(&self, register: u16) -> Option<u32> {
        self.state.lock().cdi.get(&register).copied()
    }

    pub fn history(&self) -> Vec<(u16, u32)> {
        self.state.lock().history.clone()
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_to.lock().expect("instrument not attached")
    }

    pub fn send_data(&self, bytes: &[u8]) {
        self.telemetry.send_to(bytes, self.data_addr()).unwrap();
    }

    pub fn send_housekeeping(&self, bytes: &[u8]) {
        let addr = self.housekeeping_to.lock().expect("instrument not attached");
        self.telemetry.send_to(bytes, addr).unwrap();
    }
}

impl Drop for FakeInstrument {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn bind_loopback() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(20)))
        .unwrap();
    socket
}

fn serve<F>(socket: &UdpSocket, stop: &AtomicBool, mut on_frame: F)
where
    F: FnMut(&UdpSocket, (u16, u32)),
{
    let mut buf = [0u8; 64];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, _)) => {
                if let Ok(frame) = parse_command(&buf[..len]) {
                    on_frame(socket, frame);
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(_) => break,
        }
    }
}

/// Start a fake instrument and a client connected to it
pub fn connect() -> (FakeInstrument, Client) {
    env_logger::builder().is_test(true).try_init().ok();

    let instrument = FakeInstrument::start();
    let client = Client::connect(instrument.config()).expect("client connect");
    instrument.attach(&client);
    (instrument, client)
}

/// Telemetry datagram with a CDI header; packet length is the payload size
pub fn telemetry_packet(apid: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let header = CdiHeader {
        packet_number: sequence as u32,
        apid,
        sequence_count: sequence,
        packet_length: payload.len() as u16,
        ..Default::default()
    };
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    header.write_to(&mut bytes);
    bytes.extend_from_slice(payload);
    bytes
}

/// Wire bytes for 32-bit words (halves swapped on the wire)
pub fn swapped_words(words: &[u32]) -> Vec<u8> {
    words
        .iter()
        .flat_map(|w| w.rotate_left(16).to_be_bytes())
        .collect()
}
