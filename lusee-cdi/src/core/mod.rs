//! Core data types shared by the sender, listeners and processing workers.
//!
//! - [`types`]: Register commands, replies, datagrams and telemetry records

pub mod types;
