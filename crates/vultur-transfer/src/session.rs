/// Per-attempt and per-stream bookkeeping.
///
/// `TransferSession` lives for one transmitter attempt; `StreamSession`
/// for one receiving stream on the reassembler. Both are dropped when the
/// attempt or stream resolves.

use std::time::{Duration, Instant};

use vultur_link::{ChunkMessage, Handshake};

use crate::chunk_table::ChunkTable;
use crate::config::TransferConfig;
use crate::descriptor::TransferDescriptor;

pub struct TransferSession<'a> {
    descriptor: &'a TransferDescriptor,
    chunk_size: usize,
    pub attempt: u32,
    pub packet_count: u16,
    pub pacing: Duration,
    pub resent: usize,
    started: Instant,
    deadline: Option<Instant>,
}

impl<'a> TransferSession<'a> {
    pub fn new(
        descriptor: &'a TransferDescriptor,
        config: &TransferConfig,
        attempt: u32,
        packet_count: u16,
    ) -> Self {
        Self {
            descriptor,
            chunk_size: config.chunk_size,
            attempt,
            packet_count,
            pacing: config.pacing_delay(packet_count as usize),
            resent: 0,
            started: Instant::now(),
            deadline: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.descriptor.tag
    }

    pub fn start_handshake(&self) -> Handshake {
        self.descriptor.start_handshake(self.chunk_size, self.packet_count)
    }

    pub fn end_handshake(&self) -> Handshake {
        self.descriptor.end_handshake()
    }

    /// None for sequence numbers outside this transfer.
    pub fn chunk(&self, sequence: u16) -> Option<ChunkMessage> {
        if sequence >= self.packet_count {
            return None;
        }
        self.descriptor.chunk(sequence, self.chunk_size)
    }

    /// Start the ack window. Called once per attempt, after the end handshake.
    pub fn arm_ack_window(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    /// Time left in the ack window; zero once it has elapsed or before it
    /// is armed.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A stream the reassembler is currently receiving.
pub struct StreamSession {
    pub handshake: Handshake,
    pub table: ChunkTable,
    pub started: Instant,
}

impl StreamSession {
    pub fn new(handshake: Handshake) -> Self {
        Self {
            table: ChunkTable::new(handshake.packet_count),
            handshake,
            started: Instant::now(),
        }
    }

    /// Start handshakes the reassembler accepts: packet count and chunk
    /// size agree with the announced size.
    pub fn is_consistent(handshake: &Handshake) -> bool {
        handshake.is_start()
            && handshake.chunk_size > 0
            && (handshake.total_size as usize).div_ceil(handshake.chunk_size as usize)
                == handshake.packet_count as usize
    }

    pub fn tag(&self) -> &str {
        &self.handshake.tag
    }

    /// The rebuilt payload, once every chunk is in.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        self.table.assemble(self.handshake.total_size as usize)
    }
}
