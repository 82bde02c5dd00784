//! Register sender thread
//!
//! The only writer to the instrument's control ports. Callers submit
//! [`RegisterJob`]s on one channel; a single thread drains it and runs each
//! command to completion before taking the next, so register transactions
//! are totally ordered.
//!
//! ```text
//! Client ──RegisterJob──► [sender thread] ──frames──► instrument :32000/:32001
//!    ▲                        │    ▲
//!    └──── done channel ◄─────┘    └── CDI replies (from reg-response worker)
//! ```

mod sequencer;

pub use sequencer::{RegisterSequencer, SenderTiming};

use crate::core::types::RegisterCommand;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A command plus the channel its outcome is reported on
#[derive(Debug)]
pub struct RegisterJob {
    pub command: RegisterCommand,
    pub done: Sender<Result<Option<u32>>>,
}

/// Items on the sender's command channel
#[derive(Debug)]
pub enum SenderMessage {
    Job(RegisterJob),
    /// Sentinel: the sender exits when it sees this
    Stop,
}

/// Sender loop - runs until a stop sentinel or the channel closes
pub fn sender_loop<T: Transport>(
    commands: Receiver<SenderMessage>,
    shutdown: Arc<AtomicBool>,
    mut sequencer: RegisterSequencer<T>,
) {
    log::info!("Register sender started");

    while let Ok(message) = commands.recv() {
        let job = match message {
            SenderMessage::Job(job) => job,
            SenderMessage::Stop => break,
        };

        if shutdown.load(Ordering::Relaxed) {
            let _ = job.done.send(Err(Error::ShuttingDown));
            continue;
        }

        let result = sequencer.execute(&job.command);
        if let Err(e) = &result {
            log::error!(
                "Command for register {:#x} failed: {} ({:?})",
                job.command.register(),
                e,
                job.command
            );
        }
        // Caller may have given up waiting
        let _ = job.done.send(result);
    }

    log::info!("Register sender thread exiting");
}
