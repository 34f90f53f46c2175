/// Receive-side chunk tracking for one stream.
///
/// A slot per sequence number holds the chunk data once it arrives. The
/// received count only moves on first arrival, so duplicates and
/// retransmissions never complete a stream early.

/// Result of storing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// First copy of this sequence number.
    New,
    /// Already held; data was overwritten, count unchanged.
    Duplicate,
    /// Sequence number past the announced packet count; ignored.
    OutOfRange,
}

#[derive(Debug, Clone)]
pub struct ChunkTable {
    slots: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl ChunkTable {
    /// Table for a stream of `packet_count` chunks.
    pub fn new(packet_count: u16) -> Self {
        Self {
            slots: vec![None; packet_count as usize],
            received: 0,
        }
    }

    pub fn insert(&mut self, sequence: u16, data: Vec<u8>) -> Insert {
        let Some(slot) = self.slots.get_mut(sequence as usize) else {
            return Insert::OutOfRange;
        };
        let fresh = slot.is_none();
        *slot = Some(data);
        if fresh {
            self.received += 1;
            Insert::New
        } else {
            Insert::Duplicate
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    #[inline]
    pub fn received(&self) -> usize {
        self.received
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Sequence numbers not yet received, ascending.
    pub fn missing(&self) -> Vec<u16> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u16)
            .collect()
    }

    /// Concatenate the chunks in order and cut to `total_size`, dropping
    /// the final chunk's padding. None until every chunk is present.
    pub fn assemble(&self, total_size: usize) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut out = Vec::with_capacity(total_size);
        for chunk in self.slots.iter().flatten() {
            out.extend_from_slice(chunk);
        }
        out.truncate(total_size);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::fragment;

    fn round_trip(len: usize, chunk_size: usize) -> Vec<u8> {
        let payload: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let chunks: Vec<_> = fragment(&payload, chunk_size).collect();
        let mut table = ChunkTable::new(chunks.len() as u16);
        for chunk in chunks {
            assert_eq!(table.insert(chunk.sequence, chunk.data), Insert::New);
        }
        let out = table.assemble(len).expect("complete");
        assert_eq!(out, payload);
        out
    }

    #[test]
    fn assembles_boundary_lengths() {
        let c = 253;
        for len in [1, c - 1, c, c + 1, c * 5] {
            assert_eq!(round_trip(len, c).len(), len);
        }
    }

    #[test]
    fn empty_table_is_complete() {
        let table = ChunkTable::new(0);
        assert!(table.is_complete());
        assert_eq!(table.assemble(0), Some(Vec::new()));
    }

    #[test]
    fn duplicates_do_not_count() {
        let mut table = ChunkTable::new(3);
        assert_eq!(table.insert(1, vec![1; 4]), Insert::New);
        assert_eq!(table.insert(1, vec![2; 4]), Insert::Duplicate);
        assert_eq!(table.received(), 1);
        assert_eq!(table.missing(), vec![0, 2]);
        assert_eq!(table.insert(3, vec![0; 4]), Insert::OutOfRange);
        assert!(!table.is_complete());
        assert!(table.assemble(12).is_none());
    }

    #[test]
    fn arrival_order_is_irrelevant() {
        let payload: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        let mut chunks: Vec<_> = fragment(&payload, 253).collect();
        chunks.reverse();
        let mut table = ChunkTable::new(3);
        for chunk in chunks {
            table.insert(chunk.sequence, chunk.data);
        }
        assert_eq!(table.assemble(600).unwrap(), payload);
    }
}
