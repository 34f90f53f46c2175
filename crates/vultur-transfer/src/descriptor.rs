/// Outbound payload description and fragmentation.

use bytes::Bytes;
use vultur_link::{ChunkMessage, Handshake, STREAM_KIND_IMG_JPEG, is_valid_tag};

use crate::error::TransferError;

/// One captured image ready to send. Immutable once built.
#[derive(Debug, Clone)]
pub struct TransferDescriptor {
    pub tag: String,
    pub payload: Bytes,
    pub width: u16,
    pub height: u16,
    pub quality: u8,
}

impl TransferDescriptor {
    pub fn new(tag: impl Into<String>, payload: impl Into<Bytes>, width: u16, height: u16, quality: u8) -> Self {
        Self {
            tag: tag.into(),
            payload: payload.into(),
            width,
            height,
            quality,
        }
    }

    /// Number of chunks needed at `chunk_size`.
    pub fn packet_count(&self, chunk_size: usize) -> usize {
        packet_count(self.payload.len(), chunk_size)
    }

    /// Check the descriptor can be expressed on the wire. Returns the packet
    /// count.
    pub fn validate(&self, chunk_size: usize) -> Result<u16, TransferError> {
        if !is_valid_tag(&self.tag) {
            return Err(TransferError::InvalidTag(self.tag.clone()));
        }
        // A zero packet count is the end-of-stream marker.
        if self.payload.is_empty() {
            return Err(TransferError::EmptyPayload(self.tag.clone()));
        }
        let packets = self.packet_count(chunk_size);
        let limit = u16::MAX as usize;
        if packets > limit || self.payload.len() > u32::MAX as usize {
            return Err(TransferError::PayloadTooLarge {
                size: self.payload.len(),
                packets,
                limit,
            });
        }
        Ok(packets as u16)
    }

    pub fn start_handshake(&self, chunk_size: usize, packet_count: u16) -> Handshake {
        Handshake {
            stream_kind: STREAM_KIND_IMG_JPEG,
            total_size: self.payload.len() as u32,
            width: self.width,
            height: self.height,
            packet_count,
            chunk_size: chunk_size as u16,
            quality: self.quality,
            tag: self.tag.clone(),
        }
    }

    pub fn end_handshake(&self) -> Handshake {
        Handshake::end(STREAM_KIND_IMG_JPEG, &self.tag)
    }

    /// Chunk `sequence`: payload bytes `[seq*size, (seq+1)*size)`, zero-padded
    /// to `chunk_size`. None past the end of the payload.
    pub fn chunk(&self, sequence: u16, chunk_size: usize) -> Option<ChunkMessage> {
        chunk_of(&self.payload, sequence, chunk_size)
    }
}

/// `ceil(len / chunk_size)`.
pub fn packet_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size)
}

pub fn chunk_of(payload: &[u8], sequence: u16, chunk_size: usize) -> Option<ChunkMessage> {
    let start = sequence as usize * chunk_size;
    if start >= payload.len() {
        return None;
    }
    let end = (start + chunk_size).min(payload.len());
    let mut data = vec![0u8; chunk_size];
    data[..end - start].copy_from_slice(&payload[start..end]);
    Some(ChunkMessage { sequence, data })
}

/// Every chunk of `payload` in ascending order.
pub fn fragment(payload: &[u8], chunk_size: usize) -> impl Iterator<Item = ChunkMessage> + '_ {
    let count = packet_count(payload.len(), chunk_size);
    (0..count).filter_map(move |seq| chunk_of(payload, seq as u16, chunk_size))
}
