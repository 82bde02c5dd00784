//! Mock transport for testing

use super::{ControlPort, Transport};
use crate::core::types::RegisterReply;
use crate::error::Result;
use crate::protocol::parse_command;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;

/// Called for every sent frame with `(port, register, value)`; a returned
/// reply is pushed onto the CDI reply channel as if the listener had routed it.
pub type Responder = Box<dyn FnMut(ControlPort, u16, u32) -> Option<RegisterReply> + Send>;

/// Mock transport for unit testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    sent: Vec<(ControlPort, u16, u32)>,
    responder: Option<Responder>,
    replies: Option<Sender<RegisterReply>>,
}

impl MockTransport {
    /// Create a mock that only records frames
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                sent: Vec::new(),
                responder: None,
                replies: None,
            })),
        }
    }

    /// Create a mock that answers frames through `responder`
    pub fn with_responder<F>(replies: Sender<RegisterReply>, responder: F) -> Self
    where
        F: FnMut(ControlPort, u16, u32) -> Option<RegisterReply> + Send + 'static,
    {
        let mock = Self::new();
        {
            let mut inner = mock.inner.lock();
            inner.responder = Some(Box::new(responder));
            inner.replies = Some(replies);
        }
        mock
    }

    /// All frames sent so far, decoded
    pub fn sent(&self) -> Vec<(ControlPort, u16, u32)> {
        self.inner.lock().sent.clone()
    }

    /// Number of read requests sent for `register`
    pub fn read_requests(&self, register: u16) -> usize {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|(port, reg, _)| *port == ControlPort::ReadRequest && *reg == register)
            .count()
    }

    /// Values written to `register`, in order
    pub fn writes_to(&self, register: u16) -> Vec<u32> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|(port, reg, _)| *port == ControlPort::Write && *reg == register)
            .map(|(_, _, value)| *value)
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, port: ControlPort, frame: &[u8]) -> Result<()> {
        let (register, value) = parse_command(frame)?;
        let mut inner = self.inner.lock();
        inner.sent.push((port, register, value));

        let reply = match inner.responder.as_mut() {
            Some(responder) => responder(port, register, value),
            None => None,
        };
        if let (Some(reply), Some(replies)) = (reply, inner.replies.as_ref()) {
            let _ = replies.send(reply);
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
