/// In-process channel pair for tests and simulations.
///
/// Messages are handed over as values, without MAVLink framing, so tags
/// travel with their handshakes directly.
///
/// Each endpoint can install a drop filter deciding, per outgoing message,
/// whether the simulated radio loses it. Everything an endpoint sends is
/// recorded (dropped or not) so tests can count handshakes and resends.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::channel::{Channel, LinkError};
use crate::message::Message;

/// Returns true if the message should be lost.
pub type DropFilter = Box<dyn FnMut(&Message) -> bool + Send>;

pub struct MemoryChannel {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    filter: Mutex<Option<DropFilter>>,
    sent: Arc<Mutex<Vec<Message>>>,
}

/// Create two connected endpoints.
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = unbounded();
    let (b_tx, a_rx) = unbounded();
    (MemoryChannel::new(a_tx, a_rx), MemoryChannel::new(b_tx, b_rx))
}

impl MemoryChannel {
    fn new(tx: Sender<Message>, rx: Receiver<Message>) -> Self {
        Self {
            tx,
            rx,
            filter: Mutex::new(None),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: FnMut(&Message) -> bool + Send + 'static,
    {
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Every message passed to `send`, in order, including dropped ones.
    pub fn sent_log(&self) -> Vec<Message> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Messages waiting to be received on this endpoint.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Channel for MemoryChannel {
    fn send(&self, msg: &Message) -> Result<(), LinkError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg.clone());

        let dropped = match self
            .filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            Some(filter) => filter(msg),
            None => false,
        };
        if dropped {
            return Ok(());
        }
        self.tx.send(msg.clone()).map_err(|_| LinkError::Closed)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, LinkError> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChunkMessage, StatusText};

    #[test]
    fn filter_drops_but_logs() {
        let (a, b) = memory_pair();
        a.set_drop_filter(|m| matches!(m, Message::Chunk(c) if c.sequence == 1));

        for seq in 0..3 {
            a.send(&Message::Chunk(ChunkMessage {
                sequence: seq,
                data: vec![seq as u8],
            }))
            .unwrap();
        }

        assert_eq!(a.sent_log().len(), 3);
        assert_eq!(b.pending(), 2);
        let mut got = Vec::new();
        while let Some(Message::Chunk(c)) = b.recv_timeout(Duration::from_millis(10)).unwrap() {
            got.push(c.sequence);
        }
        assert_eq!(got, vec![0, 2]);

        // The radio recovers.
        a.clear_drop_filter();
        a.send(&Message::Chunk(ChunkMessage {
            sequence: 1,
            data: vec![1],
        }))
        .unwrap();
        assert_eq!(b.pending(), 1);
        assert_eq!(a.sent_log().len(), 4);
    }

    #[test]
    fn closed_when_peer_dropped() {
        let (a, b) = memory_pair();
        drop(b);
        assert!(matches!(
            a.send(&Message::Status(StatusText::info("x"))),
            Err(LinkError::Closed)
        ));
        assert!(matches!(
            a.recv_timeout(Duration::from_millis(5)),
            Err(LinkError::Closed)
        ));
    }
}
