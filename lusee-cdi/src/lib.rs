//! LuSEE CDI - ground-side client for the LuSEE spectrometer
//!
//! This library talks to the spectrometer FPGA over the UDP "CDI" bus:
//! serialized register reads and writes through a staged-word latch
//! handshake, and reassembly of multi-packet telemetry into typed records.
//!
//! ## Example
//!
//! ```no_run
//! use lusee_cdi::{Client, Config, TelemetryClass};
//! use std::time::Duration;
//!
//! let mut client = Client::connect(Config::default())?;
//! client.write_register(0x121, 0x69)?;
//! assert_eq!(client.read_register(0x121)?, 0x69);
//!
//! client.start_capture(TelemetryClass::Pfb)?;
//! let spectrum = client.get_telemetry(TelemetryClass::Pfb, Duration::from_secs(2))?;
//! println!("{} bins", spectrum.data.len());
//! client.shutdown()?;
//! # Ok::<(), lusee_cdi::Error>(())
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod listener;
pub mod processing;
pub mod protocol;
pub mod sender;
pub mod transport;

// Re-export commonly used types
pub use client::Client;
pub use config::Config;
pub use crate::core::types::{
    PortKind, RegisterReply, TelemetryClass, TelemetryData, TelemetryRecord,
};
pub use error::{Error, Result};
pub use protocol::CdiHeader;
