/// Transfer statistics, shared between the protocol threads and the binary.
/// All fields are atomic for lock-free reads.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct TransferStats {
    /// Sender: attempts started.
    pub attempts: AtomicU64,
    /// Sender: chunks streamed in the normal pass.
    pub chunks_sent: AtomicU64,
    /// Sender: chunks resent on request.
    pub chunks_resent: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    /// Receiver: chunks accepted into a table for the first time.
    pub chunks_received: AtomicU64,
    pub chunks_duplicate: AtomicU64,
    /// Receiver: chunks outside any active stream or malformed.
    pub chunks_ignored: AtomicU64,
    pub payloads_completed: AtomicU64,
    pub decode_failures: AtomicU64,
    pub streams_abandoned: AtomicU64,
    pub handoffs_dropped: AtomicU64,
}

/// Point-in-time copy of `TransferStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub chunks_sent: u64,
    pub chunks_resent: u64,
    pub delivered: u64,
    pub failed: u64,
    pub chunks_received: u64,
    pub chunks_duplicate: u64,
    pub chunks_ignored: u64,
    pub payloads_completed: u64,
    pub decode_failures: u64,
    pub streams_abandoned: u64,
    pub handoffs_dropped: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            attempts: get(&self.attempts),
            chunks_sent: get(&self.chunks_sent),
            chunks_resent: get(&self.chunks_resent),
            delivered: get(&self.delivered),
            failed: get(&self.failed),
            chunks_received: get(&self.chunks_received),
            chunks_duplicate: get(&self.chunks_duplicate),
            chunks_ignored: get(&self.chunks_ignored),
            payloads_completed: get(&self.payloads_completed),
            decode_failures: get(&self.decode_failures),
            streams_abandoned: get(&self.streams_abandoned),
            handoffs_dropped: get(&self.handoffs_dropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes() {
        let stats = TransferStats::new();
        TransferStats::bump(&stats.attempts);
        TransferStats::bump(&stats.attempts);
        TransferStats::bump(&stats.delivered);
        let snap = stats.snapshot();
        assert_eq!(snap.attempts, 2);
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["delivered"], 1);
        assert_eq!(json["failed"], 0);
    }
}
