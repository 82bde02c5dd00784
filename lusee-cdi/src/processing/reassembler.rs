//! APID-keyed packet reassembly for the high-speed data port
//!
//! Science products arrive as bursts of datagrams sharing an APID family.
//! At most one assembly is open at a time; it completes when the expected
//! number of packets has arrived.
//!
//! | Family      | APIDs                          | Packets          | Output |
//! |-------------|--------------------------------|------------------|--------|
//! | ADC         | 0x220-0x223, 0x2F0-0x2F3       | 9                | u16 words in arrival order |
//! | FFT/PFB     | 0x210-0x21F, 0x2E0-0x2E3       | 3                | 2048 u32, halves swapped |
//! | Counter     | 0x209                          | ceil(len/0x7F8)  | u16 words |
//! | Calibration | 0x2A0-0x2A3                    | 3                | 1024 u32, halves swapped |
//! | Calibration | 0x2A4-0x2A7                    | 2                | 1024 u32, halves swapped |
//! | Calibration | 0x2A8                          | 1                | 512 u32, halves swapped |
//! | Calibration | 0x2A9                          | 1                | 1 u32, halves swapped |
//!
//! # Capture guard
//!
//! A datagram of a different family while an assembly is open discards the
//! partial assembly and reports [`Error::SequenceMismatch`] to the
//! interrupted class. The datagram then opens a fresh assembly.

use super::{DatagramHandler, TelemetrySinks};
use crate::core::types::{
    RawDatagram, TelemetryClass, TelemetryData, TelemetryRecord, TelemetryResult, WorkerControl,
};
use crate::error::{Error, Result};
use crate::protocol::CdiHeader;
use crate::protocol::constants::*;
use crate::protocol::header::payload;

/// Assembly shapes, one per APID family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblyKind {
    Adc,
    Pfb,
    Counter,
    CalTriple,
    CalDouble,
    CalBlock,
    CalScalar,
}

impl AssemblyKind {
    fn from_apid(apid: u16) -> Option<Self> {
        if ADC_APIDS.iter().any(|r| r.contains(&apid)) {
            Some(AssemblyKind::Adc)
        } else if PFB_APIDS.iter().any(|r| r.contains(&apid)) {
            Some(AssemblyKind::Pfb)
        } else if apid == COUNTER_APID {
            Some(AssemblyKind::Counter)
        } else if CAL_TRIPLE_APIDS.contains(&apid) {
            Some(AssemblyKind::CalTriple)
        } else if CAL_DOUBLE_APIDS.contains(&apid) {
            Some(AssemblyKind::CalDouble)
        } else if apid == CAL_BLOCK_APID {
            Some(AssemblyKind::CalBlock)
        } else if apid == CAL_SCALAR_APID {
            Some(AssemblyKind::CalScalar)
        } else {
            None
        }
    }

    fn class(self) -> TelemetryClass {
        match self {
            AssemblyKind::Adc => TelemetryClass::Adc,
            AssemblyKind::Pfb => TelemetryClass::Pfb,
            AssemblyKind::Counter => TelemetryClass::Counter,
            AssemblyKind::CalTriple
            | AssemblyKind::CalDouble
            | AssemblyKind::CalBlock
            | AssemblyKind::CalScalar => TelemetryClass::Calibration,
        }
    }

    /// Fixed packet count (counter depends on the configured length)
    fn fixed_packets(self) -> Option<usize> {
        match self {
            AssemblyKind::Adc => Some(ADC_PACKETS),
            AssemblyKind::Pfb => Some(PFB_PACKETS),
            AssemblyKind::Counter => None,
            AssemblyKind::CalTriple => Some(CAL_TRIPLE_PACKETS),
            AssemblyKind::CalDouble => Some(CAL_DOUBLE_PACKETS),
            AssemblyKind::CalBlock | AssemblyKind::CalScalar => Some(1),
        }
    }

    /// Word count of 32-bit products; `None` for 16-bit streams
    fn words32(self) -> Option<usize> {
        match self {
            AssemblyKind::Adc | AssemblyKind::Counter => None,
            AssemblyKind::Pfb => Some(PFB_WORDS),
            AssemblyKind::CalTriple | AssemblyKind::CalDouble => Some(CAL_PRODUCT_WORDS),
            AssemblyKind::CalBlock => Some(CAL_BLOCK_WORDS),
            AssemblyKind::CalScalar => Some(1),
        }
    }
}

/// Accumulator for one in-flight capture
#[derive(Debug)]
struct PendingAssembly {
    kind: AssemblyKind,
    apid: u16,
    expected_packets: usize,
    headers: Vec<CdiHeader>,
    words16: Vec<u16>,
    bytes: Vec<u8>,
}

impl PendingAssembly {
    fn push(&mut self, header: CdiHeader, payload: &[u8]) {
        if let Some(prev) = self.headers.last() {
            if header.packet_number != prev.packet_number.wrapping_add(1) {
                log::warn!(
                    "{} packet number jumped {} -> {}",
                    self.kind.class(),
                    prev.packet_number,
                    header.packet_number
                );
            }
            let next_seq = prev.sequence_count.wrapping_add(1) & SEQUENCE_COUNT_MASK;
            if header.sequence_count != next_seq {
                log::warn!(
                    "{} sequence count jumped {} -> {}",
                    self.kind.class(),
                    prev.sequence_count,
                    header.sequence_count
                );
            }
        }

        if self.kind.words32().is_some() {
            self.bytes.extend_from_slice(payload);
        } else {
            self.words16.extend(decode_words16(payload));
        }
        self.headers.push(header);
        log::debug!(
            "{} packet {}/{} (APID {:#05x})",
            self.kind.class(),
            self.headers.len(),
            self.expected_packets,
            header.apid
        );
    }

    fn is_complete(&self) -> bool {
        self.headers.len() >= self.expected_packets
    }

    fn finish(self) -> TelemetryResult {
        let class = self.kind.class();
        let data = match self.kind.words32() {
            None => TelemetryData::Words16(self.words16),
            Some(words) => {
                let needed = words * 4;
                if self.bytes.len() < needed {
                    return Err(Error::ProtocolMismatch(format!(
                        "{} assembly has {} payload bytes, need {}",
                        class,
                        self.bytes.len(),
                        needed
                    )));
                }
                TelemetryData::Words32(decode_swapped_words(&self.bytes[..needed]))
            }
        };

        Ok(TelemetryRecord {
            class,
            apid: self.apid,
            headers: self.headers,
            data,
        })
    }
}

/// Outcome for one telemetry class
#[derive(Debug)]
pub struct Delivery {
    pub class: TelemetryClass,
    pub result: TelemetryResult,
}

/// Reassembly state machine (one open assembly at most)
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Option<PendingAssembly>,
    /// Counter capture length in bytes, 0 = unconfigured
    counter_length: u32,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_counter_length(&mut self, bytes: u32) {
        log::info!("Counter length set to {} bytes", bytes);
        self.counter_length = bytes;
    }

    /// True while an assembly is waiting for more packets
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop a partial assembly of `class`; returns true if one was open
    ///
    /// Nothing is delivered: the capture it belonged to has already been
    /// given up, and a late error would answer the next capture.
    pub fn reset(&mut self, class: TelemetryClass) -> bool {
        match self.pending.take_if(|p| p.kind.class() == class) {
            Some(abandoned) => {
                log::warn!(
                    "Discarding incomplete {} assembly ({}/{} packets)",
                    class,
                    abandoned.headers.len(),
                    abandoned.expected_packets
                );
                true
            }
            None => false,
        }
    }

    /// Feed one datagram; returns whatever completed or failed because of it
    pub fn accept(&mut self, bytes: &[u8]) -> Vec<Delivery> {
        let mut out = Vec::new();

        let header = match CdiHeader::parse(bytes) {
            Ok(header) => header,
            Err(e) => {
                log::warn!("Dropping data datagram: {}", e);
                return out;
            }
        };
        let Some(kind) = AssemblyKind::from_apid(header.apid) else {
            log::error!("{}, discarding datagram", Error::UnknownApid(header.apid));
            return out;
        };

        if let Some(interrupted) = self.pending.take_if(|p| p.kind != kind) {
            let expected = interrupted.kind.class();
            log::warn!(
                "{} capture interrupted after {}/{} packets by APID {:#05x}, discarding",
                expected,
                interrupted.headers.len(),
                interrupted.expected_packets,
                header.apid
            );
            out.push(Delivery {
                class: expected,
                result: Err(Error::SequenceMismatch {
                    expected,
                    found: kind.class(),
                }),
            });
        }

        let payload = payload(bytes);
        if header.declared_payload_words() != payload.len() / 2 {
            log::warn!(
                "APID {:#05x}: packet length says {} words, received {}",
                header.apid,
                header.declared_payload_words(),
                payload.len() / 2
            );
        }

        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => match self.open(kind, header.apid) {
                Ok(pending) => pending,
                Err(e) => {
                    log::error!("Dropping {} datagram: {}", kind.class(), e);
                    out.push(Delivery {
                        class: kind.class(),
                        result: Err(e),
                    });
                    return out;
                }
            },
        };

        pending.push(header, payload);
        if pending.is_complete() {
            let class = pending.kind.class();
            let result = pending.finish();
            match &result {
                Ok(record) => {
                    log::debug!("{} capture complete ({} words)", class, record.data.len())
                }
                Err(e) => log::error!("{} capture discarded: {}", class, e),
            }
            out.push(Delivery { class, result });
        } else {
            self.pending = Some(pending);
        }
        out
    }

    fn open(&self, kind: AssemblyKind, apid: u16) -> Result<PendingAssembly> {
        let expected_packets = match kind.fixed_packets() {
            Some(n) => n,
            None => {
                if self.counter_length == 0 {
                    return Err(Error::NotConfigured("counter length"));
                }
                self.counter_length.div_ceil(COUNTER_BYTES_PER_PACKET) as usize
            }
        };

        Ok(PendingAssembly {
            kind,
            apid,
            expected_packets,
            headers: Vec::with_capacity(expected_packets),
            words16: Vec::new(),
            bytes: Vec::new(),
        })
    }
}

/// Big-endian 16-bit words (a trailing odd byte is dropped)
pub(crate) fn decode_words16(bytes: &[u8]) -> impl Iterator<Item = u16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
}

/// Big-endian 32-bit words with their 16-bit halves swapped
pub(crate) fn decode_swapped_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]).rotate_left(16))
        .collect()
}

/// High-speed data port handler
pub struct TelemetryDispatcher {
    reassembler: Reassembler,
    sinks: TelemetrySinks,
}

impl TelemetryDispatcher {
    pub fn new(sinks: TelemetrySinks) -> Self {
        Self {
            reassembler: Reassembler::new(),
            sinks,
        }
    }
}

impl DatagramHandler for TelemetryDispatcher {
    fn handle(&mut self, datagram: RawDatagram) {
        for delivery in self.reassembler.accept(&datagram.bytes) {
            self.sinks.deliver(delivery.class, delivery.result);
        }
    }

    fn configure(&mut self, control: WorkerControl) {
        match control {
            WorkerControl::CounterLength(bytes) => self.reassembler.set_counter_length(bytes),
            WorkerControl::ResetAssembly(class) => {
                self.reassembler.reset(class);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::telemetry_channels;
    use std::net::SocketAddr;

    fn datagram(apid: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
        let header = CdiHeader {
            packet_number: seq as u32,
            apid,
            sequence_count: seq,
            packet_length: payload.len() as u16,
            ..Default::default()
        };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes);
        bytes.extend_from_slice(payload);
        bytes
    }

    /// FFT wire bytes for `expected`: each word goes out with halves swapped
    fn swapped_wire(expected: &[u32]) -> Vec<u8> {
        expected
            .iter()
            .flat_map(|w| w.rotate_left(16).to_be_bytes())
            .collect()
    }

    fn fft_pattern() -> Vec<u32> {
        (0..PFB_WORDS as u32).map(|i| i * 0x0001_0003 + 7).collect()
    }

    #[test]
    fn test_fft_three_packets() {
        let expected = fft_pattern();
        let wire = swapped_wire(&expected);
        let mut r = Reassembler::new();

        assert!(r.accept(&datagram(0x210, 0, &wire[..2732])).is_empty());
        assert!(r.accept(&datagram(0x210, 1, &wire[2732..5464])).is_empty());
        let out = r.accept(&datagram(0x210, 2, &wire[5464..]));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class, TelemetryClass::Pfb);
        let record = out[0].result.as_ref().unwrap();
        assert_eq!(record.apid, 0x210);
        assert_eq!(record.headers.len(), 3);
        assert_eq!(record.data.as_words32().unwrap(), &expected[..]);
        assert!(!r.is_pending());
    }

    #[test]
    fn test_fft_two_packets_no_emission() {
        let wire = swapped_wire(&fft_pattern());
        let mut r = Reassembler::new();

        assert!(r.accept(&datagram(0x2E0, 0, &wire[..4096])).is_empty());
        assert!(r.accept(&datagram(0x2E0, 1, &wire[4096..])).is_empty());
        assert!(r.is_pending());
    }

    #[test]
    fn test_adc_nine_packets_in_order() {
        let words_per_packet = 100u16;
        let mut r = Reassembler::new();
        let mut out = Vec::new();

        for p in 0..ADC_PACKETS as u16 {
            let payload: Vec<u8> = (0..words_per_packet)
                .flat_map(|i| (p * words_per_packet + i).to_be_bytes())
                .collect();
            out = r.accept(&datagram(0x221, p, &payload));
            if (p as usize) < ADC_PACKETS - 1 {
                assert!(out.is_empty());
            }
        }

        assert_eq!(out.len(), 1);
        let record = out.remove(0).result.unwrap();
        assert_eq!(record.class, TelemetryClass::Adc);
        let words = record.data.as_words16().unwrap();
        assert_eq!(words.len(), ADC_PACKETS * words_per_packet as usize);
        assert!(words.iter().enumerate().all(|(i, &w)| w as usize == i));
    }

    #[test]
    fn test_counter_packet_count() {
        let mut r = Reassembler::new();
        r.set_counter_length(COUNTER_BYTES_PER_PACKET * 2 + 1);

        assert!(r.accept(&datagram(COUNTER_APID, 0, &[0, 1])).is_empty());
        assert!(r.accept(&datagram(COUNTER_APID, 1, &[0, 2])).is_empty());
        let out = r.accept(&datagram(COUNTER_APID, 2, &[0, 3]));

        let record = out[0].result.as_ref().unwrap();
        assert_eq!(record.data.as_words16().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_counter_exact_multiple() {
        let mut r = Reassembler::new();
        r.set_counter_length(COUNTER_BYTES_PER_PACKET);

        let out = r.accept(&datagram(COUNTER_APID, 0, &[0xAB, 0xCD]));
        assert_eq!(
            out[0].result.as_ref().unwrap().data,
            TelemetryData::Words16(vec![0xABCD])
        );
    }

    #[test]
    fn test_counter_unconfigured() {
        let mut r = Reassembler::new();
        let out = r.accept(&datagram(COUNTER_APID, 0, &[0, 1]));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class, TelemetryClass::Counter);
        assert!(matches!(out[0].result, Err(Error::NotConfigured(_))));
        assert!(!r.is_pending());
    }

    #[test]
    fn test_calibration_forms() {
        let product: Vec<u32> = (0..CAL_PRODUCT_WORDS as u32).collect();
        let wire = swapped_wire(&product);

        // Three packets
        let mut r = Reassembler::new();
        assert!(r.accept(&datagram(0x2A1, 0, &wire[..1400])).is_empty());
        assert!(r.accept(&datagram(0x2A1, 1, &wire[1400..2800])).is_empty());
        let out = r.accept(&datagram(0x2A1, 2, &wire[2800..]));
        assert_eq!(out[0].class, TelemetryClass::Calibration);
        assert_eq!(
            out[0].result.as_ref().unwrap().data.as_words32().unwrap(),
            &product[..]
        );

        // Two packets
        assert!(r.accept(&datagram(0x2A5, 0, &wire[..2048])).is_empty());
        let out = r.accept(&datagram(0x2A5, 1, &wire[2048..]));
        assert_eq!(out[0].result.as_ref().unwrap().data.len(), CAL_PRODUCT_WORDS);

        // Single-packet block and scalar
        let block: Vec<u32> = (0..CAL_BLOCK_WORDS as u32).map(|i| i << 8).collect();
        let out = r.accept(&datagram(CAL_BLOCK_APID, 0, &swapped_wire(&block)));
        assert_eq!(
            out[0].result.as_ref().unwrap().data.as_words32().unwrap(),
            &block[..]
        );

        let out = r.accept(&datagram(CAL_SCALAR_APID, 0, &[0x56, 0x78, 0x12, 0x34]));
        assert_eq!(
            out[0].result.as_ref().unwrap().data,
            TelemetryData::Words32(vec![0x1234_5678])
        );
    }

    #[test]
    fn test_interrupted_capture() {
        let wire = swapped_wire(&fft_pattern());
        let mut r = Reassembler::new();
        assert!(r.accept(&datagram(0x210, 0, &wire[..2732])).is_empty());

        let out = r.accept(&datagram(0x220, 0, &[0, 1]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class, TelemetryClass::Pfb);
        assert!(matches!(
            out[0].result,
            Err(Error::SequenceMismatch {
                expected: TelemetryClass::Pfb,
                found: TelemetryClass::Adc
            })
        ));

        // The interrupting datagram opened a fresh ADC assembly
        for p in 1..ADC_PACKETS as u16 - 1 {
            assert!(r.accept(&datagram(0x220, p, &[0, 1])).is_empty());
        }
        let out = r.accept(&datagram(0x220, 8, &[0, 1]));
        assert_eq!(out[0].result.as_ref().unwrap().data.len(), ADC_PACKETS);
    }

    #[test]
    fn test_reset_drops_capture_missing_a_packet() {
        let first: Vec<u32> = (0..PFB_WORDS as u32).map(|i| 0x1111_0000 | i).collect();
        let second: Vec<u32> = (0..PFB_WORDS as u32).map(|i| 0x2222_0000 | i).collect();
        let (first, second) = (swapped_wire(&first), swapped_wire(&second));
        let mut r = Reassembler::new();

        // Third packet of the first capture never arrives
        assert!(r.accept(&datagram(0x210, 0, &first[..2732])).is_empty());
        assert!(r.accept(&datagram(0x210, 1, &first[2732..5464])).is_empty());
        assert!(r.reset(TelemetryClass::Pfb));
        assert!(!r.is_pending());

        assert!(r.accept(&datagram(0x210, 0, &second[..2732])).is_empty());
        assert!(r.accept(&datagram(0x210, 1, &second[2732..5464])).is_empty());
        let out = r.accept(&datagram(0x210, 2, &second[5464..]));

        assert_eq!(out.len(), 1);
        let words = out[0].result.as_ref().unwrap().data.as_words32().unwrap();
        assert!(words.iter().all(|w| w >> 16 == 0x2222));
        assert_eq!(words[2047], 0x2222_07FF);
    }

    #[test]
    fn test_reset_leaves_other_class_open() {
        let wire = swapped_wire(&fft_pattern());
        let mut r = Reassembler::new();
        assert!(r.accept(&datagram(0x210, 0, &wire[..2732])).is_empty());

        assert!(!r.reset(TelemetryClass::Adc));
        assert!(r.is_pending());
        assert!(r.reset(TelemetryClass::Pfb));
        assert!(!r.reset(TelemetryClass::Pfb));
    }

    #[test]
    fn test_dispatcher_reset_control() {
        let (sinks, sources) = telemetry_channels();
        let mut dispatcher = TelemetryDispatcher::new(sinks);
        let wire = swapped_wire(&fft_pattern());

        dispatcher.handle(RawDatagram {
            port: crate::core::types::PortKind::HighSpeedData,
            source: "127.0.0.1:32003".parse().unwrap(),
            bytes: datagram(0x210, 0, &wire[..2732]),
        });
        dispatcher.configure(WorkerControl::ResetAssembly(TelemetryClass::Pfb));

        assert!(!dispatcher.reassembler.is_pending());
        assert!(sources.receiver(TelemetryClass::Pfb).try_recv().is_err());
    }

    #[test]
    fn test_short_product_is_protocol_mismatch() {
        let mut r = Reassembler::new();
        for p in 0..2 {
            assert!(r.accept(&datagram(0x211, p, &[0u8; 100])).is_empty());
        }
        let out = r.accept(&datagram(0x211, 2, &[0u8; 100]));
        assert!(matches!(out[0].result, Err(Error::ProtocolMismatch(_))));
        assert!(!r.is_pending());
    }

    #[test]
    fn test_unknown_apid_and_short_datagram_dropped() {
        let mut r = Reassembler::new();
        assert!(r.accept(&datagram(0x3FF, 0, &[1, 2, 3, 4])).is_empty());
        assert!(r.accept(&[0u8; 10]).is_empty());
        assert!(!r.is_pending());
    }

    #[test]
    fn test_declared_length_mismatch_uses_actual_bytes() {
        let mut r = Reassembler::new();
        r.set_counter_length(2);

        let mut bytes = datagram(COUNTER_APID, 0, &[0x00, 0x05, 0x00, 0x06]);
        bytes[24] = 0x7F; // packet length word claims far more
        let out = r.accept(&bytes);
        assert_eq!(
            out[0].result.as_ref().unwrap().data,
            TelemetryData::Words16(vec![5, 6])
        );
    }

    #[test]
    fn test_dispatcher_delivers_to_class_output() {
        let (sinks, sources) = telemetry_channels();
        let mut dispatcher = TelemetryDispatcher::new(sinks);
        let source: SocketAddr = "127.0.0.1:32003".parse().unwrap();

        dispatcher.configure(WorkerControl::CounterLength(4));
        dispatcher.handle(RawDatagram {
            port: crate::core::types::PortKind::HighSpeedData,
            source,
            bytes: datagram(COUNTER_APID, 0, &[0, 9, 0, 8]),
        });

        let record = sources
            .receiver(TelemetryClass::Counter)
            .try_recv()
            .unwrap()
            .unwrap();
        assert_eq!(record.data, TelemetryData::Words16(vec![9, 8]));
        assert!(sources.receiver(TelemetryClass::Adc).try_recv().is_err());
    }
}
