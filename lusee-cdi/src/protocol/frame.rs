//! Command frames for the CDI write and read-request ports
//!
//! Every frame is nine big-endian 16-bit words:
//!
//! ```text
//! KEY1(0xDEAD) KEY2(0xBEEF) register data_hi data_lo FOOTER(0xFFFF) 0 0 0
//! ```
//!
//! A read request is the same frame with both data words zero.
//!
//! # Pattern
//!
//! ```ignore
//! let mut frame = CommandFrame::new();   // Create once per sender
//! frame.set_write(0x2, 0xA0_0000);       // Configure
//! transport.send(ControlPort::Write, frame.as_bytes())?;
//! frame.set_read_request(0x1);           // Reuse
//! transport.send(ControlPort::ReadRequest, frame.as_bytes())?;
//! ```

use super::constants::*;
use crate::error::{Error, Result};

/// Reusable 18-byte command frame
#[derive(Debug, Clone)]
pub struct CommandFrame {
    data: [u8; FRAME_LEN],
}

impl CommandFrame {
    /// Create new frame with keys and footer pre-filled
    pub const fn new() -> Self {
        let mut data = [0u8; FRAME_LEN];
        let key1 = FRAME_KEY_1.to_be_bytes();
        let key2 = FRAME_KEY_2.to_be_bytes();
        let footer = FRAME_FOOTER.to_be_bytes();
        data[0] = key1[0];
        data[1] = key1[1];
        data[2] = key2[0];
        data[3] = key2[1];
        data[10] = footer[0];
        data[11] = footer[1];
        Self { data }
    }

    /// Frame bytes for sending
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Register write: `value` is split into high and low data words
    #[inline]
    pub fn set_write(&mut self, register: u16, value: u32) {
        self.data[4..6].copy_from_slice(&register.to_be_bytes());
        self.data[6..8].copy_from_slice(&((value >> 16) as u16).to_be_bytes());
        self.data[8..10].copy_from_slice(&(value as u16).to_be_bytes());
    }

    /// Read request: data words zero
    #[inline]
    pub fn set_read_request(&mut self, register: u16) {
        self.set_write(register, 0);
    }

    pub fn register(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    pub fn value(&self) -> u32 {
        u32::from_be_bytes([self.data[6], self.data[7], self.data[8], self.data[9]])
    }
}

impl Default for CommandFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a received command frame into `(register, value)`
///
/// Checks length, both keys and the footer.
pub fn parse_command(bytes: &[u8]) -> Result<(u16, u32)> {
    if bytes.len() < FRAME_LEN {
        return Err(Error::ShortDatagram {
            len: bytes.len(),
            needed: FRAME_LEN,
        });
    }
    let word = |i: usize| u16::from_be_bytes([bytes[2 * i], bytes[2 * i + 1]]);

    if word(0) != FRAME_KEY_1 || word(1) != FRAME_KEY_2 {
        return Err(Error::ProtocolMismatch(format!(
            "bad frame keys {:#06x} {:#06x}",
            word(0),
            word(1)
        )));
    }
    if word(5) != FRAME_FOOTER {
        return Err(Error::ProtocolMismatch(format!(
            "bad frame footer {:#06x}",
            word(5)
        )));
    }

    let value = ((word(3) as u32) << 16) | word(4) as u32;
    Ok((word(2), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_frame_layout() {
        let mut frame = CommandFrame::new();
        frame.set_write(WRITE_REGISTER, ADDRESS_WRITE_PREFIX | 0x121);

        assert_eq!(
            frame.as_bytes(),
            &[
                0xDE, 0xAD, 0xBE, 0xEF, // keys
                0x00, 0x02, // register
                0x00, 0xA2, 0x01, 0x21, // data hi, data lo
                0xFF, 0xFF, // footer
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn test_read_request_clears_data() {
        let mut frame = CommandFrame::new();
        frame.set_write(0x5, 0xFFFF_FFFF);
        frame.set_read_request(LATCH_REGISTER);

        assert_eq!(frame.register(), LATCH_REGISTER);
        assert_eq!(frame.value(), 0);
        assert_eq!(frame.as_bytes().len(), FRAME_LEN);
    }

    #[test]
    fn test_parse_command() {
        let mut frame = CommandFrame::new();
        frame.set_write(0x210, 0x1234_5678);
        assert_eq!(parse_command(frame.as_bytes()).unwrap(), (0x210, 0x1234_5678));
    }

    #[test]
    fn test_parse_command_rejects_bad_frames() {
        let mut bytes = CommandFrame::new().as_bytes().to_vec();
        assert!(matches!(
            parse_command(&bytes[..10]),
            Err(Error::ShortDatagram { len: 10, needed: 18 })
        ));

        bytes[10] = 0;
        assert!(matches!(parse_command(&bytes), Err(Error::ProtocolMismatch(_))));

        let mut bytes = CommandFrame::new().as_bytes().to_vec();
        bytes[0] = 0;
        assert!(matches!(parse_command(&bytes), Err(Error::ProtocolMismatch(_))));
    }
}
