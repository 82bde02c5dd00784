//! Public client for the LuSEE spectrometer
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────── Client ───────────────────┐
//! write/read ──────► │ commands ──► [register-sender] ──► UDP :32000/:32001
//!                    │                    ▲ CDI replies              │
//!                    │                    │                          │
//! :32002 ─► [reg-response-listener] ─► [reg-response-worker] ─► readbacks
//! :32003 ─► [hs-data-listener]      ─► [hs-data-worker]      ─► ADC/PFB/counter/cal
//! :32004 ─► [housekeeping-listener] ─► [housekeeping-worker] ─► housekeeping
//!                    └───────────────────────────────────────────────┘
//! ```
//!
//! Seven threads, connected only by channels. Register transactions are
//! serialized twice: the sender runs one command at a time, and the client
//! holds a lock across each read so a readback is paired with its request
//! (replies carry no transaction id).
//!
//! # Capture guard
//!
//! Only one instrument-triggered capture may be outstanding.
//! [`Client::start_capture`] claims it and [`Client::get_telemetry`] for the
//! same class releases it, whatever the outcome. A capture that starts, or a
//! wait that times out, discards any partial assembly of its class, so a
//! capture that lost a datagram never completes with packets of the next.

use crate::config::Config;
use crate::core::types::{
    Inbound, PortKind, RegisterCommand, RegisterReply, TelemetryClass, TelemetryRecord,
    WorkerControl,
};
use crate::error::{Error, Result};
use crate::listener::Listener;
use crate::processing::{
    DatagramHandler, HousekeepingHandler, ReplyRouter, TelemetryDispatcher, TelemetrySources,
    telemetry_channels, worker_loop,
};
use crate::protocol::constants::*;
use crate::sender::{RegisterJob, RegisterSequencer, SenderMessage, SenderTiming, sender_loop};
use crate::transport::UdpTransport;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use mio::Waker;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Connection to one instrument
pub struct Client {
    config: Config,
    shutdown: Arc<AtomicBool>,
    commands: Sender<SenderMessage>,
    readbacks: Receiver<RegisterReply>,
    telemetry: TelemetrySources,
    /// Listener -> worker channels, kept to deliver stop sentinels and settings
    inputs: Vec<(PortKind, Sender<Inbound>)>,
    wakers: Vec<Arc<Waker>>,
    listener_addrs: Vec<(PortKind, SocketAddr)>,
    threads: Vec<(String, JoinHandle<()>)>,
    register_lock: Mutex<()>,
    capture: Mutex<Option<TelemetryClass>>,
    counter_length: AtomicU32,
}

impl Client {
    /// Bind every socket and start the listener, worker and sender threads
    ///
    /// All sockets are bound before any thread starts, so a bind failure
    /// leaves nothing running.
    pub fn connect(config: Config) -> Result<Self> {
        log::info!(
            "Connecting to instrument at {} (local {})",
            config.network.instrument_ip,
            config.network.local_ip
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let transport = UdpTransport::open(&config.network)?;

        let mut bound = Vec::with_capacity(PortKind::ALL.len());
        for kind in PortKind::ALL {
            let (tx, rx) = unbounded();
            let (listener, waker) = Listener::bind(
                kind,
                config.network.listen_addr(kind),
                config.network.recv_buffer_size,
                tx.clone(),
                Arc::clone(&shutdown),
            )?;
            bound.push((kind, listener, waker, tx, rx));
        }

        let (command_tx, command_rx) = unbounded();
        let (readback_tx, readback_rx) = unbounded();
        let (cdi_tx, cdi_rx) = unbounded();
        let (sinks, telemetry) = telemetry_channels();
        let timing = SenderTiming::from(&config.timing);

        let mut client = Client {
            config,
            shutdown: Arc::clone(&shutdown),
            commands: command_tx,
            readbacks: readback_rx,
            telemetry,
            inputs: Vec::new(),
            wakers: Vec::new(),
            listener_addrs: Vec::new(),
            threads: Vec::new(),
            register_lock: Mutex::new(()),
            capture: Mutex::new(None),
            counter_length: AtomicU32::new(0),
        };

        // From here on, an early return drops the client, which joins whatever started
        for (kind, listener, waker, tx, rx) in bound {
            client.listener_addrs.push((kind, listener.local_addr()?));
            client.wakers.push(waker);
            client.inputs.push((kind, tx));

            match kind {
                PortKind::RegisterResponse => client.spawn_worker(
                    kind,
                    rx,
                    ReplyRouter::new(readback_tx.clone(), cdi_tx.clone()),
                )?,
                PortKind::HighSpeedData => {
                    client.spawn_worker(kind, rx, TelemetryDispatcher::new(sinks.clone()))?
                }
                PortKind::Housekeeping => {
                    client.spawn_worker(kind, rx, HousekeepingHandler::new(sinks.clone()))?
                }
            }
            client.spawn(format!("{}-listener", kind), move || listener.run())?;
        }

        let sequencer = RegisterSequencer::new(transport, cdi_rx, timing, Arc::clone(&shutdown));
        client.spawn("register-sender".to_string(), move || {
            sender_loop(command_rx, shutdown, sequencer)
        })?;

        log::info!("CDI client running ({} threads)", client.threads.len());
        Ok(client)
    }

    fn spawn<F>(&mut self, name: String, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|e| Error::Other(format!("Failed to spawn {} thread: {}", name, e)))?;
        self.threads.push((name, handle));
        Ok(())
    }

    fn spawn_worker<H>(
        &mut self,
        kind: PortKind,
        input: Receiver<Inbound>,
        handler: H,
    ) -> Result<()>
    where
        H: DatagramHandler + 'static,
    {
        let name = format!("{}-worker", kind);
        let shutdown = Arc::clone(&self.shutdown);
        let label = kind.name();
        self.spawn(name, move || worker_loop(label, input, shutdown, handler))
    }

    /// Actual bound address of an inbound port (useful with ephemeral ports)
    pub fn listener_addr(&self, kind: PortKind) -> Option<SocketAddr> {
        self.listener_addrs
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, addr)| *addr)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty() && !self.shutdown.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Register access
    // ========================================================================

    /// Write a spectrometer register (staged words + latch handshake)
    pub fn write_register(&self, register: u16, value: u32) -> Result<()> {
        let _guard = self.register_lock.lock();
        self.submit(RegisterCommand::Write { register, value })
            .map(|_| ())
    }

    /// Read a spectrometer register
    ///
    /// Returns [`Error::Timeout`] if no readback arrives within the
    /// configured read timeout. No automatic retry.
    pub fn read_register(&self, register: u16) -> Result<u32> {
        let _guard = self.register_lock.lock();

        // A readback left over from an abandoned read must not answer this one
        while let Ok(stale) = self.readbacks.try_recv() {
            log::debug!("Discarding stale readback {:#x}", stale.value);
        }

        self.submit(RegisterCommand::Read { register })?;

        match self.readbacks.recv_timeout(self.config.timing.read_timeout()) {
            Ok(reply) => {
                log::debug!("Register {:#x} = {:#x}", register, reply.value);
                Ok(reply.value)
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("No readback for register {:#x}", register);
                Err(Error::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
        }
    }

    /// [`Client::read_register`], retried on timeouts up to `attempts` times
    pub fn read_register_with_retry(&self, register: u16, attempts: u32) -> Result<u32> {
        let attempts = attempts.max(1);
        let mut last = Error::Timeout;

        for attempt in 1..=attempts {
            match self.read_register(register) {
                Ok(value) => return Ok(value),
                Err(e @ (Error::Timeout | Error::LatchTimeout { .. })) => {
                    log::warn!(
                        "Read of register {:#x} failed (attempt {}/{}): {}",
                        register,
                        attempt,
                        attempts,
                        e
                    );
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    /// Write a CDI register directly (no latch handshake)
    pub fn write_cdi_register(&self, register: u16, value: u32) -> Result<()> {
        let _guard = self.register_lock.lock();
        self.submit(RegisterCommand::WriteCdi { register, value })
            .map(|_| ())
    }

    /// Read a CDI register directly
    ///
    /// The readback register is not readable this way: its replies are
    /// routed to [`Client::read_register`].
    pub fn read_cdi_register(&self, register: u16) -> Result<u32> {
        if register == READBACK_REGISTER {
            return Err(Error::ProtocolMismatch(format!(
                "CDI register {:#x} replies are routed to read_register",
                register
            )));
        }
        let _guard = self.register_lock.lock();
        self.submit(RegisterCommand::ReadCdi { register })?
            .ok_or_else(|| Error::Other(format!("No value for CDI register {:#x}", register)))
    }

    fn submit(&self, command: RegisterCommand) -> Result<Option<u32>> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(Error::ShuttingDown);
        }

        let (done, done_rx) = bounded(1);
        self.commands
            .send(SenderMessage::Job(RegisterJob { command, done }))
            .map_err(|_| Error::ChannelClosed)?;

        // The sender bounds every command by its own timeouts
        done_rx.recv().map_err(|_| Error::ChannelClosed)?
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Set the counter capture length in bytes (required before a counter capture)
    pub fn set_counter_length(&self, bytes: u32) -> Result<()> {
        self.counter_length.store(bytes, Ordering::Relaxed);
        self.send_control(PortKind::HighSpeedData, WorkerControl::CounterLength(bytes))
    }

    fn send_control(&self, kind: PortKind, control: WorkerControl) -> Result<()> {
        let (_, input) = self
            .inputs
            .iter()
            .find(|(k, _)| *k == kind)
            .ok_or(Error::ChannelClosed)?;
        input
            .send(Inbound::Control(control))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Trigger a capture on the instrument
    ///
    /// ADC, PFB and counter captures pulse the start-telemetry register;
    /// calibration pulses the software-packet request register.
    /// Housekeeping is unsolicited and needs no trigger.
    pub fn start_capture(&self, class: TelemetryClass) -> Result<()> {
        let trigger = match class {
            TelemetryClass::Adc | TelemetryClass::Pfb | TelemetryClass::Counter => {
                START_TLM_REGISTER
            }
            TelemetryClass::Calibration => SW_PACKET_REGISTER,
            TelemetryClass::Housekeeping => return Ok(()),
        };

        if class == TelemetryClass::Counter && self.counter_length.load(Ordering::Relaxed) == 0 {
            return Err(Error::NotConfigured("counter length"));
        }

        {
            let mut active = self.capture.lock();
            if let Some(open) = *active {
                return Err(Error::CaptureInProgress(open));
            }
            *active = Some(class);
        }

        let receiver = self.telemetry.receiver(class);
        let mut stale = 0;
        while receiver.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            log::debug!("Discarded {} stale {} results", stale, class);
        }

        // Queued ahead of the trigger, so the worker clears any leftover
        // partial assembly before this capture's first datagram
        log::info!("Starting {} capture", class);
        let result = self
            .send_control(PortKind::HighSpeedData, WorkerControl::ResetAssembly(class))
            .and_then(|_| self.write_register(trigger, 1))
            .and_then(|_| self.write_register(trigger, 0));
        if result.is_err() {
            *self.capture.lock() = None;
        }
        result
    }

    /// Wait for the next record of `class`
    ///
    /// Releases the capture guard for `class` whatever the outcome.
    pub fn get_telemetry(
        &self,
        class: TelemetryClass,
        timeout: Duration,
    ) -> Result<TelemetryRecord> {
        let result = match self.telemetry.receiver(class).recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if class != TelemetryClass::Housekeeping {
                    // Packets of the abandoned capture must not complete a later one
                    let reset = WorkerControl::ResetAssembly(class);
                    if let Err(e) = self.send_control(PortKind::HighSpeedData, reset) {
                        log::debug!("Could not reset {} assembly: {}", class, e);
                    }
                }
                Err(Error::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
        };

        let mut active = self.capture.lock();
        if *active == Some(class) {
            *active = None;
        }
        result
    }

    /// Reset the spectrometer and the CDI, then clear the latch
    pub fn reset(&self) -> Result<()> {
        let timing = &self.config.timing;

        log::info!("Resetting spectrometer");
        self.write_register(SPECTROMETER_RESET_REGISTER, 1)?;
        thread::sleep(timing.reset_hold());
        self.write_register(SPECTROMETER_RESET_REGISTER, 0)?;
        thread::sleep(timing.reset_hold());

        log::info!("Resetting CDI");
        self.write_cdi_register(CDI_RESET_REGISTER, 1)?;
        thread::sleep(timing.reset_hold());
        self.write_cdi_register(CDI_RESET_REGISTER, 0)?;
        thread::sleep(timing.reset_recover());
        self.write_cdi_register(LATCH_REGISTER, 0)?;

        *self.capture.lock() = None;
        log::info!("Reset complete");
        Ok(())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop every thread and wait for it
    pub fn shutdown(&mut self) -> Result<()> {
        if self.threads.is_empty() {
            return Ok(());
        }
        log::info!("Shutting down CDI client...");

        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.commands.send(SenderMessage::Stop);
        for (_, input) in &self.inputs {
            let _ = input.send(Inbound::Stop);
        }
        for waker in &self.wakers {
            if let Err(e) = waker.wake() {
                log::warn!("Failed to wake listener: {}", e);
            }
        }

        let mut panicked = false;
        for (name, handle) in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("{} thread panicked", name);
                panicked = true;
            }
        }

        log::info!("CDI client stopped");
        if panicked {
            Err(Error::ThreadPanic)
        } else {
            Ok(())
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Error during client shutdown: {}", e);
        }
    }
}
