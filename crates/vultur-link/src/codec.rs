/// MAVLink mapping for link messages.
///
/// The radio carries plain MAVLink common-dialect traffic, so the image
/// protocol rides on the messages ground stations already understand:
///
/// ```text
/// Handshake  -> DATA_TRANSMISSION_HANDSHAKE (type, size, width, height,
///               packets, payload = chunk size, jpg_quality)
/// Chunk      -> ENCAPSULATED_DATA (seqnr, data[253] zero-padded)
/// StatusText -> STATUSTEXT (severity, text[50])
/// ```
///
/// DATA_TRANSMISSION_HANDSHAKE has no room for a stream tag. A start
/// handshake is therefore preceded by a STATUSTEXT `"image <tag>"`; the
/// receiving `MavDecoder` binds the announced tag to the next start
/// handshake and to the end handshakes that follow it. A start handshake
/// whose announcement was lost is tagged `UNTAGGED`.
///
/// Frames are MAVLink v2 on the way out; v1 and v2 are accepted on the way
/// in. Everything else on the link (heartbeats, attitude, ...) is skipped.

use std::io::Cursor;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::{Buf, BytesMut};
use mavlink::MavHeader;
use mavlink::common::{
    DATA_TRANSMISSION_HANDSHAKE_DATA, ENCAPSULATED_DATA_DATA, MavMessage, MavSeverity,
    MavlinkDataStreamType, STATUSTEXT_DATA,
};
use mavlink::peek_reader::PeekReader;

use crate::channel::LinkError;
use crate::message::*;

pub const MAV_STX_V1: u8 = 0xFE;
pub const MAV_STX_V2: u8 = 0xFD;

/// stx, len, seq, sysid, compid, msgid, crc.
const V1_OVERHEAD: usize = 8;
/// stx, len, incompat, compat, seq, sysid, compid, msgid[3], crc.
const V2_OVERHEAD: usize = 12;
const V2_SIGNATURE_LEN: usize = 13;
const MAVLINK_IFLAG_SIGNED: u8 = 0x01;

/// Largest frame on the wire (signed v2 with a full payload).
pub const MAX_FRAME: usize = V2_OVERHEAD + 255 + V2_SIGNATURE_LEN;

/// ENCAPSULATED_DATA payload size.
pub const ENCAPSULATED_LEN: usize = 253;

/// Status text naming the stream of the next start handshake.
pub const TAG_ANNOUNCE_PREFIX: &str = "image ";

/// Tag given to a stream whose announcement never arrived.
pub const UNTAGGED: &str = "untagged";

/// Who we are on the MAVLink network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MavIdentity {
    pub system_id: u8,
    pub component_id: u8,
}

impl MavIdentity {
    /// Companion computer on the aircraft (MAV_COMP_ID_ONBOARD_COMPUTER).
    pub const ONBOARD: Self = Self {
        system_id: 1,
        component_id: 191,
    };
    /// Ground station (MAV_COMP_ID_MISSIONPLANNER).
    pub const GROUND: Self = Self {
        system_id: 255,
        component_id: 190,
    };
}

/// Turns link messages into MAVLink v2 frames.
pub struct MavEncoder {
    identity: MavIdentity,
    sequence: AtomicU8,
}

impl MavEncoder {
    pub fn new(identity: MavIdentity) -> Self {
        Self {
            identity,
            sequence: AtomicU8::new(0),
        }
    }

    /// One frame per MAVLink message, in send order.
    pub fn encode(&self, msg: &Message) -> Result<Vec<Vec<u8>>, LinkError> {
        to_mavlink(msg)?.iter().map(|m| self.frame(m)).collect()
    }

    fn frame(&self, msg: &MavMessage) -> Result<Vec<u8>, LinkError> {
        let header = MavHeader {
            system_id: self.identity.system_id,
            component_id: self.identity.component_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        let mut buf = Cursor::new(Vec::with_capacity(MAX_FRAME));
        mavlink::write_v2_msg(&mut buf, header, msg)
            .map_err(|e| LinkError::Encode(format!("{e:?}")))?;
        Ok(buf.into_inner())
    }
}

/// The MAVLink messages that carry `msg`.
pub fn to_mavlink(msg: &Message) -> Result<Vec<MavMessage>, LinkError> {
    match msg {
        Message::Handshake(h) => {
            let mavtype = stream_type(h.stream_kind)
                .ok_or_else(|| LinkError::Encode(format!("unknown stream kind {}", h.stream_kind)))?;
            let payload = u8::try_from(h.chunk_size)
                .map_err(|_| LinkError::Encode(format!("chunk size {} too large", h.chunk_size)))?;

            let mut out = Vec::with_capacity(2);
            if h.is_start() && !h.tag.is_empty() {
                let announce = StatusText::new(
                    Severity::Debug,
                    &format!("{}{}", TAG_ANNOUNCE_PREFIX, h.tag),
                    MAX_STATUS_LEN,
                );
                out.push(statustext(&announce));
            }
            out.push(MavMessage::DATA_TRANSMISSION_HANDSHAKE(
                DATA_TRANSMISSION_HANDSHAKE_DATA {
                    size: h.total_size,
                    width: h.width,
                    height: h.height,
                    packets: h.packet_count,
                    mavtype,
                    payload,
                    jpg_quality: h.quality,
                },
            ));
            Ok(out)
        }
        Message::Chunk(c) => {
            if c.data.len() > ENCAPSULATED_LEN {
                return Err(LinkError::Encode(format!(
                    "chunk of {} bytes exceeds {}",
                    c.data.len(),
                    ENCAPSULATED_LEN
                )));
            }
            let mut data = [0u8; ENCAPSULATED_LEN];
            data[..c.data.len()].copy_from_slice(&c.data);
            Ok(vec![MavMessage::ENCAPSULATED_DATA(ENCAPSULATED_DATA_DATA {
                seqnr: c.sequence,
                data,
            })])
        }
        Message::Status(s) => Ok(vec![statustext(s)]),
    }
}

fn statustext(s: &StatusText) -> MavMessage {
    let mut text = [0u8; MAX_STATUS_LEN];
    let len = s.text.len().min(MAX_STATUS_LEN);
    text[..len].copy_from_slice(&s.text.as_bytes()[..len]);
    MavMessage::STATUSTEXT(STATUSTEXT_DATA {
        severity: mav_severity(s.severity),
        text: text.into(),
        ..Default::default()
    })
}

fn stream_type(kind: u8) -> Option<MavlinkDataStreamType> {
    use MavlinkDataStreamType::*;
    Some(match kind {
        0 => MAVLINK_DATA_STREAM_IMG_JPEG,
        1 => MAVLINK_DATA_STREAM_IMG_BMP,
        2 => MAVLINK_DATA_STREAM_IMG_RAW8U,
        3 => MAVLINK_DATA_STREAM_IMG_RAW32U,
        4 => MAVLINK_DATA_STREAM_IMG_PGM,
        5 => MAVLINK_DATA_STREAM_IMG_PNG,
        _ => return None,
    })
}

fn mav_severity(severity: Severity) -> MavSeverity {
    match severity {
        Severity::Emergency => MavSeverity::MAV_SEVERITY_EMERGENCY,
        Severity::Alert => MavSeverity::MAV_SEVERITY_ALERT,
        Severity::Critical => MavSeverity::MAV_SEVERITY_CRITICAL,
        Severity::Error => MavSeverity::MAV_SEVERITY_ERROR,
        Severity::Warning => MavSeverity::MAV_SEVERITY_WARNING,
        Severity::Notice => MavSeverity::MAV_SEVERITY_NOTICE,
        Severity::Info => MavSeverity::MAV_SEVERITY_INFO,
        Severity::Debug => MavSeverity::MAV_SEVERITY_DEBUG,
    }
}

/// Turns inbound MAVLink messages back into link messages. Holds the tag
/// announced for the current stream, so one decoder per link.
#[derive(Debug, Default)]
pub struct MavDecoder {
    announced: Option<String>,
    current: Option<String>,
}

impl MavDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// None for traffic the image protocol does not use, and for tag
    /// announcements (they are folded into the next handshake).
    pub fn decode(&mut self, msg: MavMessage) -> Option<Message> {
        match msg {
            MavMessage::STATUSTEXT(s) => {
                let end = s.text.iter().position(|&b| b == 0).unwrap_or(s.text.len());
                let text = String::from_utf8_lossy(&s.text[..end]).into_owned();
                if let Some(tag) = text.strip_prefix(TAG_ANNOUNCE_PREFIX) {
                    if is_valid_tag(tag) {
                        self.announced = Some(tag.to_string());
                        return None;
                    }
                }
                let severity = Severity::from_u8(s.severity as u8).unwrap_or(Severity::Info);
                Some(Message::Status(StatusText { severity, text }))
            }
            MavMessage::DATA_TRANSMISSION_HANDSHAKE(h) => {
                let tag = if h.packets > 0 {
                    let tag = self.announced.take().unwrap_or_else(|| UNTAGGED.to_string());
                    self.current = Some(tag.clone());
                    tag
                } else {
                    self.current.clone().unwrap_or_else(|| UNTAGGED.to_string())
                };
                Some(Message::Handshake(Handshake {
                    stream_kind: h.mavtype as u8,
                    total_size: h.size,
                    width: h.width,
                    height: h.height,
                    packet_count: h.packets,
                    chunk_size: h.payload as u16,
                    quality: h.jpg_quality,
                    tag,
                }))
            }
            MavMessage::ENCAPSULATED_DATA(c) => Some(Message::Chunk(ChunkMessage {
                sequence: c.seqnr,
                data: c.data.to_vec(),
            })),
            _ => None,
        }
    }
}

/// Incremental MAVLink frame parser over a byte stream. Feed bytes as they
/// arrive, pull frames out.
///
/// A frame that fails to parse (bad CRC, unknown message id) is skipped by
/// advancing one byte and searching for the next start marker.
#[derive(Default)]
pub struct FrameReader {
    buf: BytesMut,
    discarded: u64,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes thrown away while resynchronizing.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Bytes held waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn next_frame(&mut self) -> Option<MavMessage> {
        loop {
            match self
                .buf
                .iter()
                .position(|&b| b == MAV_STX_V2 || b == MAV_STX_V1)
            {
                Some(0) => {}
                Some(skip) => {
                    self.discarded += skip as u64;
                    self.buf.advance(skip);
                }
                None => {
                    self.discarded += self.buf.len() as u64;
                    self.buf.clear();
                    return None;
                }
            }

            if self.buf.len() < 3 {
                return None;
            }
            let v2 = self.buf[0] == MAV_STX_V2;
            let payload_len = self.buf[1] as usize;
            let frame_len = if v2 {
                let signed = self.buf[2] & MAVLINK_IFLAG_SIGNED != 0;
                V2_OVERHEAD + payload_len + if signed { V2_SIGNATURE_LEN } else { 0 }
            } else {
                V1_OVERHEAD + payload_len
            };
            if self.buf.len() < frame_len {
                return None;
            }

            let mut reader = PeekReader::new(Cursor::new(&self.buf[..frame_len]));
            let parsed = if v2 {
                mavlink::read_v2_msg::<MavMessage, _>(&mut reader)
            } else {
                mavlink::read_v1_msg::<MavMessage, _>(&mut reader)
            };
            match parsed {
                Ok((_, msg)) => {
                    self.buf.advance(frame_len);
                    return Some(msg);
                }
                Err(_) => {
                    self.discarded += 1;
                    self.buf.advance(1);
                }
            }
        }
    }
}

/// Every link message carried by one datagram.
pub fn decode_datagram(datagram: &[u8], decoder: &mut MavDecoder) -> Vec<Message> {
    let mut frames = FrameReader::new();
    frames.push(datagram);
    let mut out = Vec::new();
    while let Some(frame) = frames.next_frame() {
        out.extend(decoder.decode(frame));
    }
    out
}
