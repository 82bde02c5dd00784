//! Error types for the LuSEE CDI client

use crate::core::types::TelemetryClass;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// CDI client error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (socket bind, send, receive)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Nothing arrived before the deadline
    #[error("Communication timeout")]
    Timeout,

    /// The instrument never acknowledged a latch pulse
    #[error("Latch not acknowledged for register {register:#x} after {attempts} polls")]
    LatchTimeout {
        /// Register the abandoned command targeted
        register: u16,
        /// Number of latch status polls made
        attempts: u32,
    },

    /// Datagram or reply did not have the expected shape
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// A capture was interrupted by telemetry of another kind
    #[error("Sequence mismatch: expected {expected} telemetry, found {found}")]
    SequenceMismatch {
        /// Class of the assembly that was open
        expected: TelemetryClass,
        /// Class of the datagram that arrived instead
        found: TelemetryClass,
    },

    /// Datagram too short to hold what it claims
    #[error("Short datagram: {len} bytes, need at least {needed}")]
    ShortDatagram {
        /// Received length
        len: usize,
        /// Minimum required length
        needed: usize,
    },

    /// A required setting was never supplied
    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    /// Another capture is still outstanding
    #[error("Capture already in progress: {0}")]
    CaptureInProgress(TelemetryClass),

    /// APID not handled by any reassembler
    #[error("Unknown APID: {0:#05x}")]
    UnknownApid(u16),

    /// Peer side of an internal channel is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// The client is shutting down
    #[error("Client is shutting down")]
    ShuttingDown,

    /// A worker thread panicked
    #[error("Thread panicked")]
    ThreadPanic,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
