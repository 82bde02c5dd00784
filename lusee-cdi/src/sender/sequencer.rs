//! Register transaction state machine
//!
//! A spectrometer register write is three staged words, each committed with
//! a latch pulse:
//!
//! ```text
//! HighWord --latch--> LowWord --latch--> Address --latch--> Done
//! ```
//!
//! A latch pulse writes latch = 1, waits the settle interval, writes
//! latch = 0, then polls the latch status register until bit 31 is set.
//! Polling is bounded; exhaustion abandons the whole command with
//! [`Error::LatchTimeout`].

use crate::config::TimingConfig;
use crate::core::types::{RegisterCommand, RegisterReply};
use crate::error::{Error, Result};
use crate::protocol::CommandFrame;
use crate::protocol::constants::*;
use crate::transport::{ControlPort, Transport};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Staged-word write progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteStage {
    HighWord,
    LowWord,
    Address,
    Done,
}

impl WriteStage {
    /// Word to stage in the CDI write register, `None` once done
    fn staged_word(self, register: u16, value: u32) -> Option<u32> {
        match self {
            WriteStage::HighWord => Some(DATA_HIGH_PREFIX | (value >> 16)),
            WriteStage::LowWord => Some(DATA_LOW_PREFIX | (value & 0xFFFF)),
            WriteStage::Address => Some(ADDRESS_WRITE_PREFIX | register as u32),
            WriteStage::Done => None,
        }
    }

    fn next(self) -> Self {
        match self {
            WriteStage::HighWord => WriteStage::LowWord,
            WriteStage::LowWord => WriteStage::Address,
            WriteStage::Address | WriteStage::Done => WriteStage::Done,
        }
    }
}

/// Sender-side timing, resolved from [`TimingConfig`]
#[derive(Debug, Clone, Copy)]
pub struct SenderTiming {
    pub settle: Duration,
    pub latch_attempts: u32,
    pub latch_reply_timeout: Duration,
    pub cdi_reply_timeout: Duration,
}

impl From<&TimingConfig> for SenderTiming {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            settle: timing.settle(),
            latch_attempts: timing.latch_attempts,
            latch_reply_timeout: timing.latch_reply_timeout(),
            cdi_reply_timeout: timing.cdi_reply_timeout(),
        }
    }
}

/// Executes register commands one at a time over a [`Transport`]
///
/// CDI replies (every register reply except the readback register) arrive
/// on `cdi_replies`, routed there by the register-response worker.
pub struct RegisterSequencer<T: Transport> {
    transport: T,
    cdi_replies: Receiver<RegisterReply>,
    frame: CommandFrame,
    timing: SenderTiming,
    shutdown: Arc<AtomicBool>,
}

impl<T: Transport> RegisterSequencer<T> {
    pub fn new(
        transport: T,
        cdi_replies: Receiver<RegisterReply>,
        timing: SenderTiming,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            cdi_replies,
            frame: CommandFrame::new(),
            timing,
            shutdown,
        }
    }

    /// Run one command to completion
    ///
    /// Returns the register value for [`RegisterCommand::ReadCdi`], `None`
    /// otherwise. A spectrometer read only requests the readback; its value
    /// arrives separately on the readback channel.
    pub fn execute(&mut self, command: &RegisterCommand) -> Result<Option<u32>> {
        match *command {
            RegisterCommand::Write { register, value } => {
                self.write_register(register, value).map(|_| None)
            }
            RegisterCommand::Read { register } => self.request_read(register).map(|_| None),
            RegisterCommand::WriteCdi { register, value } => {
                self.write_cdi(register, value).map(|_| None)
            }
            RegisterCommand::ReadCdi { register } => self.read_cdi(register).map(Some),
        }
    }

    /// Staged-word write of a spectrometer register
    pub fn write_register(&mut self, register: u16, value: u32) -> Result<()> {
        log::debug!("Writing register {:#x} = {:#x}", register, value);

        let mut stage = WriteStage::HighWord;
        while let Some(word) = stage.staged_word(register, value) {
            self.write_cdi(WRITE_REGISTER, word)?;
            self.latch_pulse(register)?;
            stage = stage.next();
        }
        Ok(())
    }

    /// Stage an address-read, then ask for the readback register
    pub fn request_read(&mut self, register: u16) -> Result<()> {
        log::debug!("Requesting read of register {:#x}", register);

        self.write_cdi(WRITE_REGISTER, ADDRESS_READ_PREFIX | register as u32)?;
        self.latch_pulse(register)?;
        self.send_read_request(READBACK_REGISTER)
    }

    /// One command frame on the write port
    pub fn write_cdi(&mut self, register: u16, value: u32) -> Result<()> {
        self.frame.set_write(register, value);
        self.send_frame(ControlPort::Write)
    }

    /// Read request on the read port, then wait for the matching CDI reply
    pub fn read_cdi(&mut self, register: u16) -> Result<u32> {
        self.drain_stale_replies();
        self.send_read_request(register)?;

        match self.cdi_replies.recv_timeout(self.timing.cdi_reply_timeout) {
            Ok(reply) if reply.register == register => Ok(reply.value),
            Ok(reply) => Err(Error::ProtocolMismatch(format!(
                "asked for CDI register {:#x}, reply was for {:#x}",
                register, reply.register
            ))),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
        }
    }

    /// Commit the staged word: latch 1, settle, latch 0, poll for ready
    ///
    /// `target` is only used for error reporting.
    pub fn latch_pulse(&mut self, target: u16) -> Result<()> {
        self.write_cdi(LATCH_REGISTER, 1)?;
        if !self.timing.settle.is_zero() {
            thread::sleep(self.timing.settle);
        }
        self.write_cdi(LATCH_REGISTER, 0)?;
        self.wait_latch_ready(target)
    }

    fn wait_latch_ready(&mut self, target: u16) -> Result<()> {
        let attempts = self.timing.latch_attempts;

        for attempt in 1..=attempts {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(Error::ShuttingDown);
            }

            self.drain_stale_replies();
            self.send_read_request(LATCH_REGISTER)?;

            match self.cdi_replies.recv_timeout(self.timing.latch_reply_timeout) {
                Ok(reply) if reply.register != LATCH_REGISTER => {
                    log::warn!(
                        "Latch poll {}/{}: reply for register {:#x}, ignoring",
                        attempt,
                        attempts,
                        reply.register
                    );
                }
                Ok(reply) if reply.value & LATCH_READY_BIT != 0 => {
                    log::trace!("Latch ready after {} poll(s)", attempt);
                    return Ok(());
                }
                Ok(reply) => {
                    log::trace!(
                        "Latch poll {}/{}: status {:#010x}",
                        attempt,
                        attempts,
                        reply.value
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::debug!("Latch poll {}/{}: no reply", attempt, attempts);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::ChannelClosed),
            }
        }

        log::error!(
            "Latch not acknowledged after {} polls, abandoning command for register {:#x}",
            attempts,
            target
        );
        Err(Error::LatchTimeout {
            register: target,
            attempts,
        })
    }

    fn send_read_request(&mut self, register: u16) -> Result<()> {
        self.frame.set_read_request(register);
        self.send_frame(ControlPort::ReadRequest)
    }

    fn send_frame(&mut self, port: ControlPort) -> Result<()> {
        log::trace!(
            "{:?} frame: register {:#x}, value {:#010x}",
            port,
            self.frame.register(),
            self.frame.value()
        );
        self.transport.send(port, self.frame.as_bytes())
    }

    /// Late replies from an earlier poll must not satisfy this one
    fn drain_stale_replies(&self) {
        while let Ok(reply) = self.cdi_replies.try_recv() {
            log::trace!(
                "Dropping stale CDI reply {:#x} = {:#x}",
                reply.register,
                reply.value
            );
        }
    }
}
