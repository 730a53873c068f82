//! Mock CAN transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::frame::CanFrame;
use super::traits::{CanTransport, TransportError};
use crate::protocol::constants::CAN_RECEIVE_ID;

/// Scripted reply for the next receive.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Deliver this frame as-is.
    Frame(CanFrame),
    /// Echo the last sent frame back on the receive id (an ACK).
    Echo,
    /// Echo the last sent frame with one payload byte flipped (a NACK).
    EchoCorrupted { byte: usize },
    /// Echo the last sent frame flagged as an error frame.
    EchoError,
    /// Nothing arrives within the timeout.
    Timeout,
}

/// Mock transport for unit testing protocol logic.
pub struct MockTransport {
    /// Replies consumed in order by receive calls.
    script: Arc<Mutex<VecDeque<MockReply>>>,
    /// Frames already waiting in the receive queue (dropped by flush).
    inbox: Arc<Mutex<VecDeque<CanFrame>>>,
    /// Captured sends.
    sent: Arc<Mutex<Vec<CanFrame>>>,
    /// Call log for bus control operations.
    calls: Arc<Mutex<Vec<&'static str>>>,
    closed: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Queue a reply for a future receive.
    pub fn queue(&self, reply: MockReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    /// Queue `count` copies of the same reply.
    pub fn queue_n(&self, reply: MockReply, count: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..count {
            script.push_back(reply.clone());
        }
    }

    /// Queue a raw payload on the receive id.
    pub fn queue_frame(&self, data: [u8; 8]) {
        self.queue(MockReply::Frame(CanFrame::new(CAN_RECEIVE_ID, data)));
    }

    /// Place a frame in the receive queue before anything is sent.
    pub fn push_stale(&self, frame: CanFrame) {
        self.inbox.lock().unwrap().push_back(frame);
    }

    /// Get all captured sends.
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// Bus control operations in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// Replies not consumed yet.
    pub fn pending_replies(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if *self.closed.lock().unwrap() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn last_sent_as_reply(&self) -> Option<CanFrame> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|f| CanFrame::from_slice(CAN_RECEIVE_ID, f.data()))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CanTransport for MockTransport {
    fn send(&self, frame: &CanFrame, _timeout: Duration) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.sent.lock().unwrap().push(*frame);
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<CanFrame, TransportError> {
        self.ensure_open()?;
        if let Some(frame) = self.inbox.lock().unwrap().pop_front() {
            return Ok(frame);
        }

        let reply = self.script.lock().unwrap().pop_front();
        let frame = match reply {
            None | Some(MockReply::Timeout) => None,
            Some(MockReply::Frame(frame)) => Some(frame),
            Some(MockReply::Echo) => self.last_sent_as_reply(),
            Some(MockReply::EchoCorrupted { byte }) => self.last_sent_as_reply().map(|f| {
                let mut data = [0u8; 8];
                data.copy_from_slice(f.data());
                data[byte % 8] ^= 0xFF;
                CanFrame::new(f.id(), data)
            }),
            Some(MockReply::EchoError) => self.last_sent_as_reply().map(CanFrame::into_error),
        };
        frame.ok_or(TransportError::timeout(timeout))
    }

    fn flush_inbound(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.inbox.lock().unwrap().clear();
        self.calls.lock().unwrap().push("flush");
        Ok(())
    }

    fn set_filter(&self, _id: u32, _mask: u32, _extended: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.calls.lock().unwrap().push("set_filter");
        Ok(())
    }

    fn bus_on(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.calls.lock().unwrap().push("bus_on");
        Ok(())
    }

    fn bus_off(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.calls.lock().unwrap().push("bus_off");
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        *self.closed.lock().unwrap() = true;
        self.calls.lock().unwrap().push("close");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(100);

    #[test]
    fn test_mock_echo() {
        let mock = MockTransport::new();
        mock.queue(MockReply::Echo);
        mock.send(&CanFrame::new(0x1, [1, 2, 3, 4, 5, 6, 7, 8]), T)
            .unwrap();

        let reply = mock.receive(T).unwrap();
        assert_eq!(reply.id(), CAN_RECEIVE_ID);
        assert_eq!(reply.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);

        // Script is empty now
        assert!(mock.receive(T).unwrap_err().is_timeout());
    }

    #[test]
    fn test_mock_corrupted_echo() {
        let mock = MockTransport::new();
        mock.queue(MockReply::EchoCorrupted { byte: 2 });
        mock.send(&CanFrame::new(0x1, [0; 8]), T).unwrap();
        assert_eq!(mock.receive(T).unwrap().data()[2], 0xFF);
    }

    #[test]
    fn test_mock_flush_drops_stale_only() {
        let mock = MockTransport::new();
        mock.push_stale(CanFrame::new(CAN_RECEIVE_ID, [9; 8]));
        mock.queue_frame([1; 8]);

        mock.flush_inbound().unwrap();
        assert_eq!(mock.receive(T).unwrap().data(), &[1; 8]);
    }

    #[test]
    fn test_mock_close() {
        let mock = MockTransport::new();
        mock.bus_on().unwrap();
        mock.bus_off().unwrap();
        mock.close().unwrap();
        assert_eq!(mock.calls(), vec!["bus_on", "bus_off", "close"]);
        assert!(matches!(
            mock.send(&CanFrame::new(0x1, [0; 8]), T),
            Err(TransportError::Closed)
        ));
    }
}
