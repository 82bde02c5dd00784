//! Register reply datagrams
//!
//! Replies carry no CDI header: bytes 0-1 are the register number and bytes
//! 2-5 the value, both big-endian. Anything past byte 6 is ignored.

use super::constants::REGISTER_REPLY_LEN;
use crate::core::types::RegisterReply;
use crate::error::{Error, Result};

impl RegisterReply {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < REGISTER_REPLY_LEN {
            return Err(Error::ShortDatagram {
                len: bytes.len(),
                needed: REGISTER_REPLY_LEN,
            });
        }
        Ok(Self {
            register: u16::from_be_bytes([bytes[0], bytes[1]]),
            value: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; REGISTER_REPLY_LEN] {
        let mut out = [0u8; REGISTER_REPLY_LEN];
        out[0..2].copy_from_slice(&self.register.to_be_bytes());
        out[2..6].copy_from_slice(&self.value.to_be_bytes());
        out
    }
}
