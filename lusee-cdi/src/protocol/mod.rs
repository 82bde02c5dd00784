//! LuSEE CDI wire protocol
//!
//! - [`frame`]: Command frames sent to the write and read-request ports
//! - [`header`]: 13-word header on every telemetry datagram
//! - [`reply`]: Register reply datagrams
//! - [`constants`]: Registers, opcode prefixes, APIDs and sizes

pub mod constants;
pub mod frame;
pub mod header;
mod reply;

pub use frame::{CommandFrame, parse_command};
pub use header::CdiHeader;
