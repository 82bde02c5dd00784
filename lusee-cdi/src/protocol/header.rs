//! CDI telemetry header (13 big-endian 16-bit words)
//!
//! # Layout
//!
//! | Word | Bits   | Field |
//! |------|--------|-------|
//! | 0-1  | 32     | packet number |
//! | 2-5  | 64     | user info |
//! | 6-7  | 32     | system status |
//! | 8    | 15..10 | message id |
//! | 8    | 9..0   | message length |
//! | 9    | 16     | spare |
//! | 10   | 15..13 | CCSDS version |
//! | 10   | 12     | packet type |
//! | 10   | 11     | secondary header flag |
//! | 10   | 10..0  | APID |
//! | 11   | 15..14 | group flags |
//! | 11   | 13..0  | sequence count |
//! | 12   | 16     | packet length |
//!
//! The payload follows at byte [`HEADER_LEN`].

use super::constants::{HEADER_LEN, HEADER_WORDS};
use crate::error::{Error, Result};

/// Parsed telemetry header, one per datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CdiHeader {
    pub packet_number: u32,
    pub user_info: u64,
    pub system_status: u32,
    /// 6 bits
    pub message_id: u8,
    /// 10 bits
    pub message_length: u16,
    pub spare: u16,
    /// 3 bits
    pub version: u8,
    /// 1 bit
    pub packet_type: u8,
    pub secondary_header: bool,
    /// 11 bits
    pub apid: u16,
    /// 2 bits
    pub group_flags: u8,
    /// 14 bits
    pub sequence_count: u16,
    pub packet_length: u16,
}

impl CdiHeader {
    /// Parse the header from the start of a datagram
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::ShortDatagram {
                len: bytes.len(),
                needed: HEADER_LEN,
            });
        }

        let mut w = [0u16; HEADER_WORDS];
        for (i, word) in w.iter_mut().enumerate() {
            *word = u16::from_be_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        }

        Ok(Self {
            packet_number: ((w[0] as u32) << 16) | w[1] as u32,
            user_info: ((w[2] as u64) << 48)
                | ((w[3] as u64) << 32)
                | ((w[4] as u64) << 16)
                | w[5] as u64,
            system_status: ((w[6] as u32) << 16) | w[7] as u32,
            message_id: (w[8] >> 10) as u8,
            message_length: w[8] & 0x3FF,
            spare: w[9],
            version: (w[10] >> 13) as u8,
            packet_type: ((w[10] >> 12) & 0x1) as u8,
            secondary_header: (w[10] >> 11) & 0x1 == 1,
            apid: w[10] & 0x7FF,
            group_flags: (w[11] >> 14) as u8,
            sequence_count: w[11] & 0x3FFF,
            packet_length: w[12],
        })
    }

    /// Serialize back to wire form; each field is masked to its width
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let w: [u16; HEADER_WORDS] = [
            (self.packet_number >> 16) as u16,
            self.packet_number as u16,
            (self.user_info >> 48) as u16,
            (self.user_info >> 32) as u16,
            (self.user_info >> 16) as u16,
            self.user_info as u16,
            (self.system_status >> 16) as u16,
            self.system_status as u16,
            ((self.message_id as u16 & 0x3F) << 10) | (self.message_length & 0x3FF),
            self.spare,
            ((self.version as u16 & 0x7) << 13)
                | ((self.packet_type as u16 & 0x1) << 12)
                | ((self.secondary_header as u16) << 11)
                | (self.apid & 0x7FF),
            ((self.group_flags as u16 & 0x3) << 14) | (self.sequence_count & 0x3FFF),
            self.packet_length,
        ];

        let mut out = [0u8; HEADER_LEN];
        for (chunk, word) in out.chunks_exact_mut(2).zip(w) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Append the serialized header to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bytes());
    }

    /// Payload length in 16-bit words as declared by the packet length field
    pub fn declared_payload_words(&self) -> usize {
        (self.packet_length >> 1) as usize
    }
}

/// Payload bytes following the header (empty if the datagram is header-only)
pub fn payload(bytes: &[u8]) -> &[u8] {
    bytes.get(HEADER_LEN..).unwrap_or(&[])
}
