//! Core data types for register traffic and telemetry.
//!
//! Key types:
//! - [`RegisterCommand`]: One register transaction, consumed by the sender thread
//! - [`RawDatagram`]: One received UDP datagram, moved from listener to worker
//! - [`TelemetryRecord`]: A reassembled telemetry product handed to the caller

use crate::error::Result;
use crate::protocol::CdiHeader;
use std::fmt;
use std::net::SocketAddr;

/// Inbound UDP ports, one listener and one processing worker each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Register and CDI replies
    RegisterResponse,
    /// High-speed science data (ADC, FFT, counter, calibration)
    HighSpeedData,
    /// Unsolicited housekeeping packets
    Housekeeping,
}

impl PortKind {
    /// Every inbound port, in startup order
    pub const ALL: [PortKind; 3] = [
        PortKind::RegisterResponse,
        PortKind::HighSpeedData,
        PortKind::Housekeeping,
    ];

    /// Short name used for thread names and log lines
    pub fn name(self) -> &'static str {
        match self {
            PortKind::RegisterResponse => "reg-response",
            PortKind::HighSpeedData => "hs-data",
            PortKind::Housekeeping => "housekeeping",
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One received datagram, owned
#[derive(Debug, Clone)]
pub struct RawDatagram {
    pub port: PortKind,
    pub source: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Settings a processing worker accepts over its input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerControl {
    /// Counter capture length in bytes (0 clears it)
    CounterLength(u32),
    /// Discard a partial assembly of this class
    ResetAssembly(TelemetryClass),
}

/// Items carried on a listener -> worker input channel
#[derive(Debug)]
pub enum Inbound {
    Datagram(RawDatagram),
    Control(WorkerControl),
    /// Sentinel: the worker exits when it sees this
    Stop,
}

/// A single register transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterCommand {
    /// Spectrometer register write through the staged-word protocol
    Write { register: u16, value: u32 },
    /// Spectrometer register read; the value arrives on the readback channel
    Read { register: u16 },
    /// Direct CDI register write (one frame)
    WriteCdi { register: u16, value: u32 },
    /// Direct CDI register read (one request, one reply)
    ReadCdi { register: u16 },
}

impl RegisterCommand {
    /// Register the command targets
    pub fn register(&self) -> u16 {
        match *self {
            RegisterCommand::Write { register, .. }
            | RegisterCommand::Read { register }
            | RegisterCommand::WriteCdi { register, .. }
            | RegisterCommand::ReadCdi { register } => register,
        }
    }
}

/// Reply datagram from the register-response port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterReply {
    pub register: u16,
    pub value: u32,
}

/// Telemetry product families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryClass {
    /// Raw ADC samples (9 packets of 16-bit words)
    Adc,
    /// Polyphase filter bank spectra (3 packets, 2048 words of 32 bits)
    Pfb,
    /// Event counter dump (length set by the caller)
    Counter,
    /// Calibrator products
    Calibration,
    /// Unsolicited housekeeping
    Housekeeping,
}

impl TelemetryClass {
    /// Every class, in output-channel order
    pub const ALL: [TelemetryClass; 5] = [
        TelemetryClass::Adc,
        TelemetryClass::Pfb,
        TelemetryClass::Counter,
        TelemetryClass::Calibration,
        TelemetryClass::Housekeeping,
    ];

    /// Position in [`TelemetryClass::ALL`]
    pub fn index(self) -> usize {
        match self {
            TelemetryClass::Adc => 0,
            TelemetryClass::Pfb => 1,
            TelemetryClass::Counter => 2,
            TelemetryClass::Calibration => 3,
            TelemetryClass::Housekeeping => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TelemetryClass::Adc => "adc",
            TelemetryClass::Pfb => "pfb",
            TelemetryClass::Counter => "counter",
            TelemetryClass::Calibration => "calibration",
            TelemetryClass::Housekeeping => "housekeeping",
        }
    }
}

impl fmt::Display for TelemetryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded telemetry payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryData {
    Words16(Vec<u16>),
    Words32(Vec<u32>),
}

impl TelemetryData {
    /// Number of decoded words
    pub fn len(&self) -> usize {
        match self {
            TelemetryData::Words16(words) => words.len(),
            TelemetryData::Words32(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_words16(&self) -> Option<&[u16]> {
        match self {
            TelemetryData::Words16(words) => Some(words),
            TelemetryData::Words32(_) => None,
        }
    }

    pub fn as_words32(&self) -> Option<&[u32]> {
        match self {
            TelemetryData::Words32(words) => Some(words),
            TelemetryData::Words16(_) => None,
        }
    }
}

/// A fully reassembled telemetry product
#[derive(Debug, Clone)]
pub struct TelemetryRecord {
    pub class: TelemetryClass,
    /// APID of the first packet in the assembly
    pub apid: u16,
    /// One header per contributing datagram, in arrival order
    pub headers: Vec<CdiHeader>,
    pub data: TelemetryData,
}

/// What travels on a telemetry output channel
pub type TelemetryResult = Result<TelemetryRecord>;
