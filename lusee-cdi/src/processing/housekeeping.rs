//! Housekeeping port handler
//!
//! Each housekeeping datagram is a complete record: header plus 32-bit
//! words carrying the same half-word swap as the science products.

use super::reassembler::decode_swapped_words;
use super::{DatagramHandler, TelemetrySinks};
use crate::core::types::{RawDatagram, TelemetryClass, TelemetryData, TelemetryRecord};
use crate::protocol::CdiHeader;
use crate::protocol::header::payload;

pub struct HousekeepingHandler {
    sinks: TelemetrySinks,
}

impl HousekeepingHandler {
    pub fn new(sinks: TelemetrySinks) -> Self {
        Self { sinks }
    }
}

impl DatagramHandler for HousekeepingHandler {
    fn handle(&mut self, datagram: RawDatagram) {
        let header = match CdiHeader::parse(&datagram.bytes) {
            Ok(header) => header,
            Err(e) => {
                log::warn!("Dropping housekeeping datagram: {}", e);
                return;
            }
        };

        let words = decode_swapped_words(payload(&datagram.bytes));
        log::debug!(
            "Housekeeping packet APID {:#05x}, {} words",
            header.apid,
            words.len()
        );
        self.sinks.deliver(
            TelemetryClass::Housekeeping,
            Ok(TelemetryRecord {
                class: TelemetryClass::Housekeeping,
                apid: header.apid,
                headers: vec![header],
                data: TelemetryData::Words32(words),
            }),
        );
    }
}
