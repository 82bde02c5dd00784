//! Configuration for the LuSEE CDI client
//!
//! Loads configuration from a TOML file. Every section and field has a
//! default matching the flight instrument's ground-test network, so a file
//! only needs the values it changes.

use crate::core::types::PortKind;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Top-level client configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
}

/// Addresses and ports
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Instrument (FPGA) address
    pub instrument_ip: IpAddr,
    /// Local interface all sockets bind to
    pub local_ip: IpAddr,
    /// Instrument port for register writes
    pub write_port: u16,
    /// Instrument port for register read requests
    pub read_port: u16,
    /// Local port receiving register replies (0 = ephemeral)
    pub register_response_port: u16,
    /// Local port receiving high-speed science data (0 = ephemeral)
    pub data_port: u16,
    /// Local port receiving housekeeping (0 = ephemeral)
    pub housekeeping_port: u16,
    /// Receive buffer per datagram in bytes
    pub recv_buffer_size: usize,
}

/// Protocol timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait between latch = 1 and latch = 0
    pub settle_ms: u64,
    /// Latch status polls before a command is abandoned
    pub latch_attempts: u32,
    /// Wait for each latch status reply
    pub latch_reply_timeout_ms: u64,
    /// Wait for a direct CDI register reply
    pub cdi_reply_timeout_ms: u64,
    /// Wait for a spectrometer register readback
    pub read_timeout_ms: u64,
    /// Readback attempts for reads that retry on timeout
    pub read_attempts: u32,
    /// Hold time after asserting a reset line
    pub reset_hold_ms: u64,
    /// Recovery time after releasing a reset line
    pub reset_recover_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error); RUST_LOG overrides
    pub level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            instrument_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 121, 1)),
            local_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 121, 50)),
            write_port: 32000,
            read_port: 32001,
            register_response_port: 32002,
            data_port: 32003,
            housekeeping_port: 32004,
            recv_buffer_size: crate::protocol::constants::RECV_BUFFER_SIZE,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 10,
            latch_attempts: 10,
            latch_reply_timeout_ms: 100,
            cdi_reply_timeout_ms: 1000,
            read_timeout_ms: 1000,
            read_attempts: 10,
            reset_hold_ms: 2000,
            reset_recover_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn instrument_write_addr(&self) -> SocketAddr {
        SocketAddr::new(self.instrument_ip, self.write_port)
    }

    pub fn instrument_read_addr(&self) -> SocketAddr {
        SocketAddr::new(self.instrument_ip, self.read_port)
    }

    /// Local bind address for an inbound port
    pub fn listen_addr(&self, kind: PortKind) -> SocketAddr {
        let port = match kind {
            PortKind::RegisterResponse => self.register_response_port,
            PortKind::HighSpeedData => self.data_port,
            PortKind::Housekeeping => self.housekeeping_port,
        };
        SocketAddr::new(self.local_ip, port)
    }

    /// Loopback instrument and local address with ephemeral local ports
    pub fn loopback(write_port: u16, read_port: u16) -> Self {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            instrument_ip: localhost,
            local_ip: localhost,
            write_port,
            read_port,
            register_response_port: 0,
            data_port: 0,
            housekeeping_port: 0,
            ..Default::default()
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn latch_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.latch_reply_timeout_ms)
    }

    pub fn cdi_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.cdi_reply_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reset_hold(&self) -> Duration {
        Duration::from_millis(self.reset_hold_ms)
    }

    pub fn reset_recover(&self) -> Duration {
        Duration::from_millis(self.reset_recover_ms)
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use lusee_cdi::config::Config;
    ///
    /// let config = Config::from_file("lusee.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
