//! Constants for the LuSEE CDI bus protocol

use std::ops::RangeInclusive;

// Command frame words
pub const FRAME_KEY_1: u16 = 0xDEAD;
pub const FRAME_KEY_2: u16 = 0xBEEF;
pub const FRAME_FOOTER: u16 = 0xFFFF;
pub const FRAME_WORDS: usize = 9;
pub const FRAME_LEN: usize = FRAME_WORDS * 2; // 18 bytes

// CDI registers
pub const CDI_RESET_REGISTER: u16 = 0x0;
pub const LATCH_REGISTER: u16 = 0x1; // Write 1 then 0 to commit the staged word
pub const WRITE_REGISTER: u16 = 0x2; // Staged word: opcode prefix | 16-bit payload
pub const READBACK_REGISTER: u16 = 0xB; // Holds the result of an address-read

/// Latch status bit: set once the instrument has consumed the staged word
pub const LATCH_READY_BIT: u32 = 0x8000_0000;

// Staged-word opcode prefixes (written to WRITE_REGISTER)
pub const DATA_HIGH_PREFIX: u32 = 0xA0_0000;
pub const DATA_LOW_PREFIX: u32 = 0xA1_0000;
pub const ADDRESS_WRITE_PREFIX: u32 = 0xA2_0000;
pub const ADDRESS_READ_PREFIX: u32 = 0xA3_0000;
pub const OPCODE_MASK: u32 = 0xFF_0000;

// Spectrometer registers
pub const SPECTROMETER_RESET_REGISTER: u16 = 0x0;
pub const START_TLM_REGISTER: u16 = 0x210; // Pulse 1/0 to start a science capture
pub const SW_PACKET_REGISTER: u16 = 0x218; // Pulse 1/0 to request software packets
pub const SELF_TEST_REGISTER: u16 = 0x121;
pub const SELF_TEST_VALUE: u32 = 0x69;

// Telemetry header
pub const HEADER_WORDS: usize = 13;
pub const HEADER_LEN: usize = HEADER_WORDS * 2; // Payload starts here
pub const REGISTER_REPLY_LEN: usize = 6; // register(2) + value(4)

// Receive buffer (jumbo frame)
pub const RECV_BUFFER_SIZE: usize = 9014;

// APIDs
pub const COUNTER_APID: u16 = 0x209;
pub const PFB_APIDS: [RangeInclusive<u16>; 2] = [0x210..=0x21F, 0x2E0..=0x2E3];
pub const ADC_APIDS: [RangeInclusive<u16>; 2] = [0x220..=0x223, 0x2F0..=0x2F3];
pub const CAL_TRIPLE_APIDS: RangeInclusive<u16> = 0x2A0..=0x2A3;
pub const CAL_DOUBLE_APIDS: RangeInclusive<u16> = 0x2A4..=0x2A7;
pub const CAL_BLOCK_APID: u16 = 0x2A8;
pub const CAL_SCALAR_APID: u16 = 0x2A9;

// Assembly sizes
pub const ADC_PACKETS: usize = 9;
pub const PFB_PACKETS: usize = 3;
pub const PFB_WORDS: usize = 2048;
pub const COUNTER_BYTES_PER_PACKET: u32 = 0x7F8;
pub const CAL_TRIPLE_PACKETS: usize = 3;
pub const CAL_DOUBLE_PACKETS: usize = 2;
pub const CAL_PRODUCT_WORDS: usize = 1024;
pub const CAL_BLOCK_WORDS: usize = 512;
pub const SEQUENCE_COUNT_MASK: u16 = 0x3FFF;
