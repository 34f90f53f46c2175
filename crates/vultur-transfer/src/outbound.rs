/// Non-blocking outbound queue for the reassembler.
///
/// The receive loop must never stall on the radio, so acknowledgments and
/// retry requests are queued here and written by a dedicated thread. The
/// writer exits once every `OutboundQueue` handle is dropped.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError, bounded};
use vultur_link::{Channel, Message, StatusText};

#[derive(Clone)]
pub struct OutboundQueue {
    tx: Sender<Message>,
}

impl OutboundQueue {
    /// Queue `msg` for the writer. Returns false when the queue is full or
    /// the writer is gone; the message is dropped.
    pub fn push(&self, msg: Message) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                tracing::warn!(kind = msg.kind(), "outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn status(&self, line: StatusText) -> bool {
        self.push(Message::Status(line))
    }
}

/// Spawn the writer thread for `channel`. `depth` bounds queued messages.
pub fn spawn_writer(channel: Arc<dyn Channel>, depth: usize) -> (OutboundQueue, JoinHandle<()>) {
    let (tx, rx) = bounded::<Message>(depth.max(1));
    let handle = std::thread::spawn(move || {
        for msg in rx {
            if let Err(e) = channel.send(&msg) {
                if e.is_terminal() {
                    tracing::warn!(error = %e, "outbound writer stopping");
                    return;
                }
                tracing::warn!(error = %e, kind = msg.kind(), "outbound send failed");
            }
        }
        tracing::debug!("outbound writer finished");
    });
    (OutboundQueue { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vultur_link::memory_pair;

    #[test]
    fn writes_in_order_and_exits() {
        let (a, b) = memory_pair();
        let (queue, handle) = spawn_writer(Arc::new(a), 4);
        assert!(queue.status(StatusText::info("one")));
        assert!(queue.status(StatusText::info("two")));
        drop(queue);
        handle.join().unwrap();

        let first = b.recv_timeout(Duration::from_millis(100)).unwrap();
        let second = b.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(first, Some(Message::Status(StatusText::info("one"))));
        assert_eq!(second, Some(Message::Status(StatusText::info("two"))));
    }
}
