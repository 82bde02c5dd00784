//! Processing workers: one per inbound port
//!
//! # Architecture
//!
//! ```text
//! Listener ──Inbound──► worker_loop<H> ──► H::handle(datagram)
//!                                              │
//!            reg-response : ReplyRouter        ├──► readback / CDI reply channels
//!            hs-data      : TelemetryDispatcher├──► ADC / PFB / counter / calibration outputs
//!            housekeeping : HousekeepingHandler└──► housekeeping output
//! ```
//!
//! Every worker runs the same loop; only the handler differs. Datagrams
//! that arrive once the shutdown flag is set are dropped unprocessed. The
//! loop exits on [`Inbound::Stop`] or when every sender is gone, which
//! drops the handler and closes its output channels.

mod housekeeping;
pub mod reassembler;
mod registers;

pub use housekeeping::HousekeepingHandler;
pub use reassembler::{Reassembler, TelemetryDispatcher};
pub use registers::ReplyRouter;

use crate::core::types::{Inbound, RawDatagram, TelemetryClass, TelemetryResult, WorkerControl};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-port datagram processing
pub trait DatagramHandler: Send {
    /// Process one datagram
    fn handle(&mut self, datagram: RawDatagram);

    /// Apply a setting sent down the input channel
    fn configure(&mut self, control: WorkerControl) {
        log::warn!("Ignoring {:?}: not applicable to this worker", control);
    }
}

/// Worker loop - runs until a stop sentinel or the input channel closes
pub fn worker_loop<H: DatagramHandler>(
    name: &str,
    input: Receiver<Inbound>,
    shutdown: Arc<AtomicBool>,
    mut handler: H,
) {
    log::info!("{} worker started", name);

    let mut dropped = 0u64;
    while let Ok(item) = input.recv() {
        match item {
            Inbound::Stop => {
                log::debug!("{} worker told to stop", name);
                break;
            }
            Inbound::Control(control) => handler.configure(control),
            Inbound::Datagram(datagram) => {
                if shutdown.load(Ordering::Relaxed) {
                    dropped += 1;
                    continue;
                }
                handler.handle(datagram);
            }
        }
    }

    if dropped > 0 {
        log::debug!("{} worker dropped {} datagrams during shutdown", name, dropped);
    }
    log::info!("{} worker thread exiting", name);
}

/// Producer side of the per-class telemetry output channels
#[derive(Clone)]
pub struct TelemetrySinks {
    senders: Vec<Sender<TelemetryResult>>,
}

/// Consumer side of the per-class telemetry output channels
pub struct TelemetrySources {
    receivers: Vec<Receiver<TelemetryResult>>,
}

/// One unbounded output channel per [`TelemetryClass`]
pub fn telemetry_channels() -> (TelemetrySinks, TelemetrySources) {
    let (senders, receivers): (Vec<_>, Vec<_>) =
        TelemetryClass::ALL.iter().map(|_| unbounded()).unzip();
    (TelemetrySinks { senders }, TelemetrySources { receivers })
}

impl TelemetrySinks {
    pub fn deliver(&self, class: TelemetryClass, result: TelemetryResult) {
        if self.senders[class.index()].send(result).is_err() {
            log::debug!("{} output closed, dropping result", class);
        }
    }
}

impl TelemetrySources {
    pub fn receiver(&self, class: TelemetryClass) -> &Receiver<TelemetryResult> {
        &self.receivers[class.index()]
    }
}
