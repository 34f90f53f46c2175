/// Transfer logging trait for structured lifecycle logs.
///
/// The transmitter and reassembler report every attempt and outcome as a
/// `TransferLog`; the default `TracingLogger` turns them into timestamped
/// `tracing` lines.

use std::fmt;
use std::time::Duration;

use sha2::{Digest, Sha256};

/// Structured log entry for one stream.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub tag: String,
    pub event: TransferEvent,
}

impl TransferLog {
    pub fn new(component: &'static str, tag: &str, event: TransferEvent) -> Self {
        Self {
            component,
            tag: tag.to_string(),
            event,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Sender: start handshake out for this attempt
    AttemptStarted {
        attempt: u32,
        max_retries: u32,
        packet_count: u16,
        pacing_ms: u64,
    },
    /// Sender: all chunks and the end handshake are out
    ChunksStreamed { attempt: u32, packet_count: u16 },
    /// Sender: receiver asked for chunks again
    RetransmitRequest { attempt: u32, sequences: Vec<u16> },
    /// Sender: receiver acknowledged the transfer
    AckReceived { attempt: u32, duration_ms: u64 },
    /// Sender: ack window elapsed
    AckTimeout { attempt: u32 },
    /// Sender: every attempt used up
    TransferFailed { attempts: u32 },
    /// Either side: transport error
    LinkError { message: String },
    /// Receiver: start handshake accepted
    TransferStarted {
        total_size: u32,
        packet_count: u16,
        width: u16,
        height: u16,
    },
    /// Receiver: incomplete stream replaced by a newer start handshake
    StreamAbandoned { received: usize, total: usize },
    /// Receiver: retry lines queued for missing chunks
    MissingRequested { missing: usize },
    /// Receiver: every chunk present, payload rebuilt
    PayloadAssembled {
        total_size: usize,
        sha256: String,
        duration_ms: u64,
    },
    /// Receiver: payload did not decode
    DecodeFailed { reason: String },
    /// Receiver: consumer queue full, payload dropped
    HandoffDropped { total_size: usize },
}

impl TransferEvent {
    /// `elapsed` runs from the accepted start handshake.
    pub fn assembled(payload: &[u8], elapsed: Duration) -> Self {
        Self::PayloadAssembled {
            total_size: payload.len(),
            sha256: hex::encode(Sha256::digest(payload)),
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptStarted { attempt, max_retries, packet_count, pacing_ms } => {
                write!(f, "attempt_started attempt={}/{} packets={} pacing_ms={}", attempt, max_retries, packet_count, pacing_ms)
            }
            Self::ChunksStreamed { attempt, packet_count } => {
                write!(f, "chunks_streamed attempt={} packets={}", attempt, packet_count)
            }
            Self::RetransmitRequest { attempt, sequences } => {
                write!(f, "retransmit_request attempt={} seqs={:?}", attempt, sequences)
            }
            Self::AckReceived { attempt, duration_ms } => {
                write!(f, "ack_received attempt={} duration_ms={}", attempt, duration_ms)
            }
            Self::AckTimeout { attempt } => {
                write!(f, "ack_timeout attempt={}", attempt)
            }
            Self::TransferFailed { attempts } => {
                write!(f, "transfer_failed attempts={}", attempts)
            }
            Self::LinkError { message } => {
                write!(f, "link_error: {}", message)
            }
            Self::TransferStarted { total_size, packet_count, width, height } => {
                write!(f, "transfer_started size={} packets={} dims={}x{}", total_size, packet_count, width, height)
            }
            Self::StreamAbandoned { received, total } => {
                write!(f, "stream_abandoned received={}/{}", received, total)
            }
            Self::MissingRequested { missing } => {
                write!(f, "missing_requested count={}", missing)
            }
            Self::PayloadAssembled { total_size, sha256, duration_ms } => {
                write!(f, "payload_assembled size={} sha256={} duration_ms={}", total_size, sha256, duration_ms)
            }
            Self::DecodeFailed { reason } => {
                write!(f, "decode_failed: {}", reason)
            }
            Self::HandoffDropped { total_size } => {
                write!(f, "handoff_dropped size={}", total_size)
            }
        }
    }
}

/// Trait for transfer logging. Implementations can write to tracing,
/// collect entries for tests, or discard them.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        match &entry.event {
            TransferEvent::AckTimeout { .. }
            | TransferEvent::TransferFailed { .. }
            | TransferEvent::LinkError { .. }
            | TransferEvent::StreamAbandoned { .. }
            | TransferEvent::DecodeFailed { .. }
            | TransferEvent::HandoffDropped { .. } => {
                tracing::warn!(component = entry.component, tag = %entry.tag, "{}", entry.event);
            }
            TransferEvent::RetransmitRequest { .. } | TransferEvent::MissingRequested { .. } => {
                tracing::debug!(component = entry.component, tag = %entry.tag, "{}", entry.event);
            }
            _ => {
                tracing::info!(component = entry.component, tag = %entry.tag, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every entry as `(tag, event name)`.
    #[derive(Default)]
    pub(crate) struct CollectingLogger {
        entries: Mutex<Vec<(String, String)>>,
    }

    impl CollectingLogger {
        pub(crate) fn entries(&self) -> Vec<(String, String)> {
            self.entries.lock().unwrap().clone()
        }
    }

    impl TransferLogger for CollectingLogger {
        fn log(&self, entry: TransferLog) {
            let line = entry.event.to_string();
            let name = line.split([' ', ':']).next().unwrap_or_default().to_string();
            self.entries.lock().unwrap().push((entry.tag, name));
        }
    }

    #[test]
    fn display_is_key_value() {
        let ev = TransferEvent::AttemptStarted {
            attempt: 2,
            max_retries: 3,
            packet_count: 3,
            pacing_ms: 21,
        };
        assert_eq!(ev.to_string(), "attempt_started attempt=2/3 packets=3 pacing_ms=21");
    }

    #[test]
    fn assembled_hashes_payload() {
        match TransferEvent::assembled(b"abc", Duration::from_millis(1500)) {
            TransferEvent::PayloadAssembled { total_size, sha256, duration_ms } => {
                assert_eq!(total_size, 3);
                assert_eq!(duration_ms, 1500);
                assert_eq!(
                    sha256,
                    "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
