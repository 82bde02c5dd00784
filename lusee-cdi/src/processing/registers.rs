//! Register-response port handler
//!
//! Replies for the readback register go to the caller waiting in
//! `Client::read_register`; every other reply (latch status, direct CDI
//! reads) goes to the sender thread.

use super::DatagramHandler;
use crate::core::types::{RawDatagram, RegisterReply};
use crate::protocol::constants::READBACK_REGISTER;
use crossbeam_channel::Sender;

pub struct ReplyRouter {
    readback: Sender<RegisterReply>,
    cdi: Sender<RegisterReply>,
}

impl ReplyRouter {
    pub fn new(readback: Sender<RegisterReply>, cdi: Sender<RegisterReply>) -> Self {
        Self { readback, cdi }
    }
}

impl DatagramHandler for ReplyRouter {
    fn handle(&mut self, datagram: RawDatagram) {
        let reply = match RegisterReply::parse(&datagram.bytes) {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Dropping register reply from {}: {}", datagram.source, e);
                return;
            }
        };
        log::trace!("Register reply {:#x} = {:#010x}", reply.register, reply.value);

        let (channel, name) = if reply.register == READBACK_REGISTER {
            (&self.readback, "readback")
        } else {
            (&self.cdi, "CDI reply")
        };
        if channel.send(reply).is_err() {
            log::debug!("{} channel closed, dropping reply", name);
        }
    }
}
